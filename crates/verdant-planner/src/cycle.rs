//! Planning cycle orchestration.
//!
//! One cycle walks every registered function through the state machine
//! `PENDING -> NORMALIZED -> CACHED_HIT | SCORED -> RANKED -> WRITTEN`,
//! with `FAILED` as the terminal state for anything that errors along
//! the way. The cycle honours a global deadline: functions still
//! unplanned when it elapses keep their prior schedule and are reported
//! as `FAILED_TIMEOUT`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, DurationRound, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use verdant_core::{
    metadata_hash, Catalog, ForecastDocument, ForecastMode, FunctionId, FunctionMetadata,
    Recommendation, Schedule,
};
use verdant_store::{layout, BucketStore};
use verdant_telemetry::{Event, PlanOutcome, Recorder};

use crate::cache::PlanCache;
use crate::config::CycleConfig;
use crate::deploy::DeploymentOrchestrator;
use crate::error::{PlannerError, Result};
use crate::forecast::ForecastFetcher;
use crate::normalize::{Normalized, Normalizer};
use crate::rank::{build_schedule, RankingOracle};
use crate::registry;
use crate::score::score_candidates;

/// Per-function outcome within one cycle, as reported by `/run`.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionReport {
    pub status: PlanOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub top_recommendations: Vec<Recommendation>,
    pub total_recommendations: usize,
    /// Region to deployed URL, for regions realised this cycle.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub deployment: BTreeMap<String, String>,
}

impl FunctionReport {
    fn failed(error: &PlannerError) -> Self {
        Self {
            status: PlanOutcome::Failed,
            error: Some(error.to_string()),
            top_recommendations: Vec::new(),
            total_recommendations: 0,
            deployment: BTreeMap::new(),
        }
    }

    fn timed_out() -> Self {
        Self {
            status: PlanOutcome::FailedTimeout,
            error: Some("cycle deadline elapsed".to_string()),
            top_recommendations: Vec::new(),
            total_recommendations: 0,
            deployment: BTreeMap::new(),
        }
    }

    fn from_schedule(status: PlanOutcome, schedule: &Schedule) -> Self {
        let mut top: Vec<Recommendation> =
            schedule.ranked().into_iter().cloned().collect();
        top.truncate(5);
        Self {
            status,
            error: None,
            top_recommendations: top,
            total_recommendations: schedule.recommendations.len(),
            deployment: schedule
                .deployment
                .iter()
                .map(|(region, d)| (region.clone(), d.url.clone()))
                .collect(),
        }
    }
}

/// Summary of one planning cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at_utc: DateTime<Utc>,
    pub mode: ForecastMode,
    /// Zones that failed to fetch this cycle.
    pub forecast_failed_zones: Vec<String>,
    /// Transient-error retries spent fetching forecasts.
    pub forecast_retries: u32,
    pub functions: BTreeMap<String, FunctionReport>,
}

impl CycleSummary {
    /// Whether every function reached a successful terminal state.
    pub fn all_succeeded(&self) -> bool {
        self.functions
            .values()
            .all(|r| matches!(r.status, PlanOutcome::Written | PlanOutcome::CachedHit))
    }
}

/// The planner: one instance drives all cycles for the process.
pub struct Planner {
    catalog: Arc<Catalog>,
    store: BucketStore,
    fetcher: ForecastFetcher,
    normalizer: Arc<Normalizer>,
    ranker: Arc<dyn RankingOracle>,
    cache: PlanCache,
    orchestrator: Option<Arc<DeploymentOrchestrator>>,
    recorder: Arc<Recorder>,
    config: CycleConfig,
}

impl Planner {
    /// Wires up a planner from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<Catalog>,
        store: BucketStore,
        fetcher: ForecastFetcher,
        normalizer: Arc<Normalizer>,
        ranker: Arc<dyn RankingOracle>,
        cache: PlanCache,
        orchestrator: Option<Arc<DeploymentOrchestrator>>,
        recorder: Arc<Recorder>,
        config: CycleConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            fetcher,
            normalizer,
            ranker,
            cache,
            orchestrator,
            recorder,
            config,
        }
    }

    /// Runs a full planning cycle over the registry.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let cycle_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.deadline;
        info!(cycle_id = %cycle_id, "planning cycle started");

        let descriptors = registry::load(&self.store).await?;
        let mut reports: BTreeMap<String, FunctionReport> = BTreeMap::new();

        // Parse and normalize every descriptor first; per-function
        // failures (bad registrations included) are terminal for the
        // function, not the cycle.
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let normalizations = descriptors.into_iter().map(|(id, parsed)| {
            let semaphore = semaphore.clone();
            async move {
                let result = match parsed {
                    Ok(descriptor) => {
                        let _permit =
                            semaphore.acquire().await.expect("semaphore not closed");
                        self.normalizer
                            .normalize(&id, &descriptor, &self.catalog)
                            .await
                    }
                    Err(e) => Err(e),
                };
                (id, result)
            }
        });

        let mut normalized: Vec<(FunctionId, Normalized)> = Vec::new();
        for (id, result) in join_all(normalizations).await {
            match result {
                Ok(n) => normalized.push((id, n)),
                Err(e) => {
                    warn!(function = %id, error = %e, "descriptor rejected for this cycle");
                    self.emit(Event::PlannerRun {
                        cycle_id: cycle_id.clone(),
                        scenario: None,
                        function_id: id.clone(),
                        status: PlanOutcome::Failed,
                        mode: None,
                        region: None,
                        hour_start_utc: None,
                        forecast_g_per_kwh: None,
                        carbon_g: None,
                        cost_usd: None,
                        retries: 0,
                    })
                    .await;
                    reports.insert(id.to_string(), FunctionReport::failed(&e));
                }
            }
        }

        if normalized.is_empty() {
            return Ok(CycleSummary {
                cycle_id,
                started_at_utc: started_at,
                mode: self.fetcher.mode(),
                forecast_failed_zones: Vec::new(),
                forecast_retries: 0,
                functions: reports,
            });
        }

        // One fetch covers the union of zones the cycle needs.
        let zones = self.zones_for(normalized.iter().map(|(_, n)| &n.metadata));
        let (forecast, forecast_retries) = self.fetcher.fetch(&zones).await?;
        let horizon_start = hour_floor(Utc::now());

        let forecast = Arc::new(forecast);
        let plans = normalized.into_iter().map(|(id, n)| {
            let semaphore = semaphore.clone();
            let forecast = forecast.clone();
            let cycle_id = cycle_id.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let report = match tokio::time::timeout_at(
                    deadline,
                    self.plan_function(&cycle_id, &n, &forecast, horizon_start),
                )
                .await
                {
                    Ok(report) => report,
                    Err(_) => {
                        warn!(function = %id, "cycle deadline elapsed, keeping prior schedule");
                        self.emit(Event::PlannerRun {
                            cycle_id: cycle_id.clone(),
                            scenario: None,
                            function_id: id.clone(),
                            status: PlanOutcome::FailedTimeout,
                            mode: None,
                            region: None,
                            hour_start_utc: None,
                            forecast_g_per_kwh: None,
                            carbon_g: None,
                            cost_usd: None,
                            retries: n.retries,
                        })
                        .await;
                        FunctionReport::timed_out()
                    }
                };
                (id, report)
            }
        });

        for (id, report) in join_all(plans).await {
            reports.insert(id.to_string(), report);
        }

        let summary = CycleSummary {
            cycle_id,
            started_at_utc: started_at,
            mode: self.fetcher.mode(),
            forecast_failed_zones: forecast.failed_zones.clone(),
            forecast_retries,
            functions: reports,
        };
        info!(
            cycle_id = %summary.cycle_id,
            functions = summary.functions.len(),
            all_succeeded = summary.all_succeeded(),
            "planning cycle finished"
        );
        Ok(summary)
    }

    /// Plans a single ad-hoc function outside the registry.
    ///
    /// Used by `/submit`: fetches forecasts for just this function's
    /// zones, then runs the regular per-function path, including
    /// deployment.
    pub async fn plan_single(&self, metadata: FunctionMetadata) -> Result<(Schedule, FunctionReport)> {
        metadata.validate(&self.catalog)?;
        let cycle_id = Uuid::new_v4().to_string();
        let zones = self.zones_for(std::iter::once(&metadata));
        let (forecast, _) = self.fetcher.fetch(&zones).await?;
        let horizon_start = hour_floor(Utc::now());

        let normalized = Normalized {
            metadata,
            assumptions: Vec::new(),
            warnings: Vec::new(),
            retries: 0,
        };
        let report = self
            .plan_function(&cycle_id, &normalized, &forecast, horizon_start)
            .await;
        if !matches!(
            report.status,
            PlanOutcome::Written | PlanOutcome::CachedHit
        ) {
            return Err(PlannerError::Planning(
                report.error.unwrap_or_else(|| "unknown failure".into()),
            ));
        }

        let schedule = self
            .store
            .get_json(&layout::schedule(normalized.metadata.function_id.as_str()))
            .await?;
        Ok((schedule, report))
    }

    /// Plans one function: cache check, scoring, ranking, write,
    /// deployment.
    async fn plan_function(
        &self,
        cycle_id: &str,
        normalized: &Normalized,
        forecast: &ForecastDocument,
        horizon_start: DateTime<Utc>,
    ) -> FunctionReport {
        let metadata = &normalized.metadata;
        let id = &metadata.function_id;

        let hash = match metadata_hash(metadata) {
            Ok(hash) => hash,
            Err(e) => {
                let e = PlannerError::from(e);
                error!(function = %id, error = %e, "metadata hash failed");
                return FunctionReport::failed(&e);
            }
        };

        if metadata.allow_schedule_caching {
            if let Some(cached) = self.cache.lookup(id, &hash, horizon_start).await {
                info!(function = %id, "cache hit, skipping planning");
                self.emit_outcome(cycle_id, metadata, &cached, PlanOutcome::CachedHit, normalized.retries)
                    .await;
                return FunctionReport::from_schedule(PlanOutcome::CachedHit, &cached);
            }
        }

        match self
            .score_rank_write(normalized, forecast, horizon_start)
            .await
        {
            Ok(schedule) => {
                self.emit_outcome(cycle_id, metadata, &schedule, PlanOutcome::Written, normalized.retries)
                    .await;
                FunctionReport::from_schedule(PlanOutcome::Written, &schedule)
            }
            Err(e) => {
                error!(function = %id, error = %e, "planning failed");
                self.emit(Event::PlannerRun {
                    cycle_id: cycle_id.to_string(),
                    scenario: None,
                    function_id: id.clone(),
                    status: PlanOutcome::Failed,
                    mode: Some(forecast.mode),
                    region: None,
                    hour_start_utc: None,
                    forecast_g_per_kwh: None,
                    carbon_g: None,
                    cost_usd: None,
                    retries: normalized.retries,
                })
                .await;
                FunctionReport::failed(&e)
            }
        }
    }

    async fn score_rank_write(
        &self,
        normalized: &Normalized,
        forecast: &ForecastDocument,
        horizon_start: DateTime<Utc>,
    ) -> Result<Schedule> {
        let metadata = &normalized.metadata;
        let candidates = score_candidates(metadata, &self.catalog, forecast, horizon_start);
        if candidates.is_empty() {
            return Err(PlannerError::NoCandidates(
                metadata.function_id.to_string(),
            ));
        }

        let ranked = self.ranker.rank(metadata, &candidates).await?;
        let mut schedule =
            build_schedule(metadata, &candidates, &ranked, horizon_start, forecast.mode)?;

        let name = layout::schedule(metadata.function_id.as_str());
        self.store.put_json_atomic(&name, &schedule).await?;

        if let Some(orchestrator) = &self.orchestrator {
            if let Err(e) = orchestrator.realise(&mut schedule, metadata).await {
                // Deployment trouble never un-writes the schedule.
                warn!(function = %metadata.function_id, error = %e, "deployment pass failed");
            } else if !schedule.deployment.is_empty() {
                self.store.put_json_atomic(&name, &schedule).await?;
            }
        }

        Ok(schedule)
    }

    fn zones_for<'a>(
        &self,
        functions: impl Iterator<Item = &'a FunctionMetadata>,
    ) -> BTreeSet<String> {
        let mut zones = BTreeSet::new();
        for metadata in functions {
            for region in &metadata.allowed_regions {
                if let Some(zone) = self.catalog.zone_of(region) {
                    zones.insert(zone.to_owned());
                }
            }
        }
        zones
    }

    async fn emit_outcome(
        &self,
        cycle_id: &str,
        metadata: &FunctionMetadata,
        schedule: &Schedule,
        status: PlanOutcome,
        retries: u32,
    ) {
        let top = schedule.ranked().first().map(|r| (*r).clone());
        let carbon_g = top.as_ref().and_then(|r| {
            crate::score::energy_kwh(metadata, &self.catalog, &r.region)
                .map(|energy| energy * r.carbon_intensity_g_per_kwh)
        });
        self.emit(Event::PlannerRun {
            cycle_id: cycle_id.to_string(),
            scenario: None,
            function_id: schedule.function_id.clone(),
            status,
            mode: Some(schedule.mode),
            region: top.as_ref().map(|r| r.region.clone()),
            hour_start_utc: top.as_ref().map(|r| r.hour_start_utc),
            forecast_g_per_kwh: top.as_ref().map(|r| r.carbon_intensity_g_per_kwh),
            carbon_g,
            cost_usd: top.as_ref().map(|r| r.transfer_cost_usd),
            retries,
        })
        .await;
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.recorder.record(event).await {
            warn!(error = %e, "failed to record planner event");
        }
    }
}

/// Truncates a timestamp down to the start of its hour.
pub fn hour_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(chrono::Duration::hours(1))
        .expect("hour truncation cannot overflow")
}
