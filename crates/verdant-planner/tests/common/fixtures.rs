//! Test fixtures for planner integration tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use serde_json::{json, Value};

use verdant_core::{
    Catalog, CatalogDefaults, ForecastMode, ForecastPoint, PowerProfile, RegionEntry,
    ZoneForecast,
};
use verdant_planner::error::{PlannerError, Result};
use verdant_planner::{ForecastProvider, Oracle};

/// Start of the current hour; every fixture forecast begins here.
pub fn horizon_start() -> DateTime<Utc> {
    Utc::now()
        .duration_trunc(chrono::Duration::hours(1))
        .unwrap()
}

/// Two-region catalog: r1 (zone Z1, free egress) and r2 (zone Z2,
/// 0.05 USD/GB egress).
pub fn two_region_catalog() -> Catalog {
    let mut regions = BTreeMap::new();
    for (key, zone, egress) in [("r1", "Z1", 0.0), ("r2", "Z2", 0.05)] {
        regions.insert(
            key.to_string(),
            RegionEntry {
                name: key.to_string(),
                zone: zone.to_string(),
                egress_usd_per_gb: egress,
                pricing_tier: "standard".to_string(),
                has_gpu: false,
                gpu_type: None,
                power: PowerProfile {
                    cpu_min_w_per_vcpu: 1.0,
                    cpu_max_w_per_vcpu: 4.0,
                    mem_w_per_gib: 0.4,
                    gpu_min_w: None,
                    gpu_max_w: None,
                    pue: 1.1,
                },
            },
        );
    }
    Catalog::new(regions, CatalogDefaults::default()).unwrap()
}

/// A structured registry descriptor with the given weights.
pub fn descriptor(weights: Value) -> Value {
    json!({
        "runtime_ms": 5000,
        "memory_mb": 1024,
        "data_input_gb": 0.1,
        "data_output_gb": 0.1,
        "source_region": "r1",
        "invocations_per_day": 100,
        "allowed_regions": ["r1", "r2"],
        "weights": weights,
    })
}

/// Forecast provider serving flat per-zone intensities.
///
/// `fail_first` makes the first N calls fail with a transient error to
/// exercise the retry path.
pub struct FlatProvider {
    pub intensities: BTreeMap<String, f64>,
    pub fail_first: u32,
    calls: AtomicU32,
}

impl FlatProvider {
    pub fn new(intensities: &[(&str, f64)]) -> Self {
        Self {
            intensities: intensities
                .iter()
                .map(|(zone, ci)| (zone.to_string(), *ci))
                .collect(),
            fail_first: 0,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }
}

#[async_trait]
impl ForecastProvider for FlatProvider {
    async fn fetch_zone(
        &self,
        zone: &str,
        _mode: ForecastMode,
        horizon_hours: u32,
    ) -> Result<ZoneForecast> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(PlannerError::Store(verdant_store::StoreError::ObjectStore(
                object_store::Error::Generic {
                    store: "test",
                    source: "503 service unavailable".into(),
                },
            )));
        }

        let intensity = *self
            .intensities
            .get(zone)
            .ok_or_else(|| PlannerError::NoCandidates(format!("unknown zone {zone}")))?;
        let start = horizon_start();
        Ok(ZoneForecast {
            zone: zone.to_string(),
            points: (0..horizon_hours)
                .map(|h| ForecastPoint {
                    hour_start_utc: start + chrono::Duration::hours(i64::from(h)),
                    carbon_intensity: intensity,
                })
                .collect(),
        })
    }
}

/// Oracle that must never be called; structured descriptors only.
pub struct NullOracle;

#[async_trait]
impl Oracle for NullOracle {
    async fn complete(&self, _prompt: &str, _schema: &Value) -> Result<Value> {
        panic!("oracle must not be called in this test");
    }
}
