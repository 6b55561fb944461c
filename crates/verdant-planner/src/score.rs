//! Candidate scorer.
//!
//! Scores every viable (region, hour) slot in the planning horizon for
//! a function. Scoring is a pure function of metadata, catalog, and
//! forecast, so repeated runs over unchanged inputs produce identical
//! candidates.

use chrono::{DateTime, Duration, Utc};

use verdant_core::{Catalog, ForecastDocument, FunctionMetadata};

const MIB_PER_GIB: f64 = 1024.0;
const HOURS_PER_SECOND: f64 = 1.0 / 3600.0;
const KW_PER_W: f64 = 1.0 / 1000.0;

/// A scored (region, hour) slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub region: String,
    pub hour_start_utc: DateTime<Utc>,
    /// Whole hours between horizon start and this slot.
    pub hour_offset: i64,
    /// Forecast carbon intensity for the slot.
    pub carbon_intensity: f64,
    pub energy_kwh: f64,
    pub emissions_g: f64,
    pub transfer_cost_usd: f64,
    /// Deferral fraction of the deadline window, in [0, 1].
    pub latency_penalty: f64,
    /// Weighted, normalised objective. Lower is better.
    pub composite: f64,
    /// Region egress rate, used for tie-breaking.
    pub egress_rate: f64,
}

/// Expected energy per invocation in a region, in kWh.
///
/// CPU and GPU draw interpolate between idle and peak by utilisation;
/// memory draw is allocation-based. Compute energy is PUE-scaled, and
/// the network term covers total bytes moved.
pub fn energy_kwh(metadata: &FunctionMetadata, catalog: &Catalog, region: &str) -> Option<f64> {
    let power = catalog.power(region)?;
    let defaults = catalog.defaults();

    let vcpus = f64::from(metadata.effective_vcpus(catalog));
    let cpu_util = metadata.effective_cpu_utilization(catalog);
    let cpu_w = vcpus
        * (power.cpu_min_w_per_vcpu
            + cpu_util * (power.cpu_max_w_per_vcpu - power.cpu_min_w_per_vcpu));

    let mem_gib = f64::from(metadata.memory_mb) / MIB_PER_GIB;
    let mem_w = mem_gib * power.mem_w_per_gib;

    let gpu_w = if metadata.gpu_required {
        let (min, max) = (power.gpu_min_w?, power.gpu_max_w?);
        min + defaults.gpu_utilization * (max - min)
    } else {
        0.0
    };

    let runtime_h = metadata.runtime_ms as f64 / 1000.0 * HOURS_PER_SECOND;
    let compute_kwh = (cpu_w + mem_w + gpu_w) * KW_PER_W * runtime_h * power.pue;

    let total_gb = metadata.data_input_gb + metadata.data_output_gb;
    let network_kwh = total_gb * defaults.network_kwh_per_gb;

    Some(compute_kwh + network_kwh)
}

/// Scores every viable slot and returns candidates sorted best-first.
///
/// Regions outside `allowed_regions`, regions without GPUs for GPU
/// functions, hours outside the horizon, and hours past the deadline
/// are all excluded. Composite scores are min-max normalised within
/// the function's own candidate set.
pub fn score_candidates(
    metadata: &FunctionMetadata,
    catalog: &Catalog,
    forecast: &ForecastDocument,
    horizon_start: DateTime<Utc>,
) -> Vec<Candidate> {
    let horizon_end = horizon_start + Duration::hours(24);
    let mut candidates = Vec::new();

    for region in &metadata.allowed_regions {
        if metadata.gpu_required && !catalog.has_gpu(region) {
            continue;
        }
        let Some(zone) = catalog.zone_of(region) else {
            continue;
        };
        let Some(zone_forecast) = forecast.zones.get(zone) else {
            continue;
        };
        let Some(energy) = energy_kwh(metadata, catalog, region) else {
            continue;
        };
        let egress = catalog.egress_rate(region, &metadata.source_region);
        let transfer_cost = metadata.data_output_gb * egress;

        for point in &zone_forecast.points {
            let hour = point.hour_start_utc;
            if hour < horizon_start || hour >= horizon_end {
                continue;
            }
            let offset = (hour - horizon_start).num_hours();
            if offset > i64::from(metadata.deadline_hours) {
                continue;
            }
            let latency_penalty = if metadata.deadline_hours == 0 {
                0.0
            } else {
                offset.max(0) as f64 / f64::from(metadata.deadline_hours)
            };

            candidates.push(Candidate {
                region: region.clone(),
                hour_start_utc: hour,
                hour_offset: offset,
                carbon_intensity: point.carbon_intensity,
                energy_kwh: energy,
                emissions_g: energy * point.carbon_intensity,
                transfer_cost_usd: transfer_cost,
                latency_penalty,
                composite: 0.0,
                egress_rate: egress,
            });
        }
    }

    apply_composite(&mut candidates, metadata);
    candidates.sort_by(|a, b| {
        a.composite
            .total_cmp(&b.composite)
            .then(a.hour_start_utc.cmp(&b.hour_start_utc))
            .then(a.egress_rate.total_cmp(&b.egress_rate))
            .then(a.region.cmp(&b.region))
    });
    candidates
}

/// Fills in composite scores using min-max normalisation over the set.
fn apply_composite(candidates: &mut [Candidate], metadata: &FunctionMetadata) {
    if candidates.is_empty() {
        return;
    }
    let weights = metadata.weights.normalise();

    let emissions = minmax(candidates.iter().map(|c| c.emissions_g));
    let cost = minmax(candidates.iter().map(|c| c.transfer_cost_usd));
    let latency = minmax(candidates.iter().map(|c| c.latency_penalty));

    for candidate in candidates {
        candidate.composite = weights.carbon * normalise(candidate.emissions_g, emissions)
            + weights.cost * normalise(candidate.transfer_cost_usd, cost)
            + weights.latency * normalise(candidate.latency_penalty, latency);
    }
}

fn minmax(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    })
}

fn normalise(value: f64, (min, max): (f64, f64)) -> f64 {
    if max - min <= f64::EPSILON {
        0.0
    } else {
        (value - min) / (max - min)
    }
}
