//! Schedule documents - the planner's output per function.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::forecast::ForecastMode;
use crate::metadata::FunctionId;

/// A single ranked (region, hour) recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Rank, 1 is best. Priorities form 1..N without gaps.
    pub priority: u32,
    pub region: String,
    pub hour_start_utc: DateTime<Utc>,
    /// Forecast value this slot was scored against.
    pub carbon_intensity_g_per_kwh: f64,
    /// Incremental egress cost versus running at the source region.
    pub transfer_cost_usd: f64,
    /// Free-text justification; empty in deterministic mode.
    #[serde(default)]
    pub rationale: String,
}

/// Deployment record for one region, embedded in the schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDeployment {
    pub url: String,
    pub code_hash: String,
    pub deployed_at_utc: DateTime<Utc>,
}

/// Per-function schedule document, persisted as
/// `schedule_<function_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub function_id: FunctionId,
    /// Hour-aligned start of the planning horizon.
    pub horizon_start_utc: DateTime<Utc>,
    pub generated_at_utc: DateTime<Utc>,
    pub mode: ForecastMode,
    pub recommendations: Vec<Recommendation>,
    /// Region key to deployment info, for every region the plan may
    /// route to that is currently deployed.
    #[serde(default)]
    pub deployment: BTreeMap<String, RegionDeployment>,
    /// Plan-cache component: SHA-256 of the canonical normalized
    /// metadata.
    pub metadata_hash: String,
}

impl Schedule {
    /// Validates the schedule invariants.
    ///
    /// Priorities must be exactly 1..N, slots unique by (region, hour),
    /// and every hour inside [horizon_start, horizon_start + 24h).
    pub fn validate(&self) -> Result<()> {
        let n = self.recommendations.len() as u32;
        let mut priorities = BTreeSet::new();
        let mut slots = BTreeSet::new();
        let horizon_end = self.horizon_start_utc + Duration::hours(24);

        for rec in &self.recommendations {
            if rec.priority < 1 || rec.priority > n {
                return Err(CoreError::Validation(format!(
                    "{}: priority {} outside 1..{}",
                    self.function_id, rec.priority, n
                )));
            }
            if !priorities.insert(rec.priority) {
                return Err(CoreError::Validation(format!(
                    "{}: duplicate priority {}",
                    self.function_id, rec.priority
                )));
            }
            if !slots.insert((rec.region.clone(), rec.hour_start_utc)) {
                return Err(CoreError::Validation(format!(
                    "{}: duplicate slot ({}, {})",
                    self.function_id, rec.region, rec.hour_start_utc
                )));
            }
            if rec.hour_start_utc < self.horizon_start_utc || rec.hour_start_utc >= horizon_end {
                return Err(CoreError::Validation(format!(
                    "{}: slot {} outside horizon",
                    self.function_id, rec.hour_start_utc
                )));
            }
        }
        Ok(())
    }

    /// Recommendations sorted by priority, best first.
    pub fn ranked(&self) -> Vec<&Recommendation> {
        let mut recs: Vec<&Recommendation> = self.recommendations.iter().collect();
        recs.sort_by_key(|r| r.priority);
        recs
    }

    /// Deployed URL for a region, if any.
    pub fn url_for(&self, region: &str) -> Option<&str> {
        self.deployment.get(region).map(|d| d.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 20, h, 0, 0).unwrap()
    }

    fn rec(priority: u32, region: &str, h: u32) -> Recommendation {
        Recommendation {
            priority,
            region: region.to_string(),
            hour_start_utc: hour(h),
            carbon_intensity_g_per_kwh: 50.0,
            transfer_cost_usd: 0.0,
            rationale: String::new(),
        }
    }

    fn schedule(recs: Vec<Recommendation>) -> Schedule {
        Schedule {
            function_id: FunctionId::new("f"),
            horizon_start_utc: hour(0),
            generated_at_utc: hour(0),
            mode: ForecastMode::Forecast,
            recommendations: recs,
            deployment: BTreeMap::new(),
            metadata_hash: "00".to_string(),
        }
    }

    #[test]
    fn valid_schedule_passes() {
        schedule(vec![rec(1, "eu-north", 3), rec(2, "eu-west", 3)])
            .validate()
            .unwrap();
    }

    #[test]
    fn priority_gap_rejected() {
        assert!(schedule(vec![rec(1, "eu-north", 3), rec(3, "eu-west", 4)])
            .validate()
            .is_err());
    }

    #[test]
    fn duplicate_slot_rejected() {
        assert!(schedule(vec![rec(1, "eu-north", 3), rec(2, "eu-north", 3)])
            .validate()
            .is_err());
    }

    #[test]
    fn slot_outside_horizon_rejected() {
        let mut s = schedule(vec![rec(1, "eu-north", 3)]);
        s.recommendations[0].hour_start_utc = hour(3) + Duration::hours(24);
        assert!(s.validate().is_err());
    }

    #[test]
    fn ranked_orders_by_priority() {
        let s = schedule(vec![rec(2, "eu-west", 4), rec(1, "eu-north", 3)]);
        let ranked = s.ranked();
        assert_eq!(ranked[0].priority, 1);
        assert_eq!(ranked[0].region, "eu-north");
    }

    #[test]
    fn document_shape_is_stable() {
        let s = schedule(vec![rec(1, "eu-north", 3)]);
        let json: serde_json::Value = serde_json::to_value(&s).unwrap();
        assert!(json.get("function_id").is_some());
        assert!(json.get("horizon_start_utc").is_some());
        assert!(json.get("mode").is_some());
        assert_eq!(json["mode"], "forecast");
        assert!(json["recommendations"][0].get("hour_start_utc").is_some());
        assert!(json.get("metadata_hash").is_some());
    }
}
