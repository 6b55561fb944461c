//! Function metadata - the workload descriptors the planner consumes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{CoreError, Result};

/// Unique function identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    /// Creates a new function ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Priority weights over the three objectives.
///
/// Weights are nonnegative with at least one positive; `normalise`
/// rescales them to sum to 1 before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub carbon: f64,
    pub cost: f64,
    pub latency: f64,
}

impl Weights {
    /// Validates the weight invariants.
    pub fn validate(&self) -> Result<()> {
        let all = [self.carbon, self.cost, self.latency];
        if all.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(CoreError::Validation(
                "weights must be finite and nonnegative".into(),
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(CoreError::Validation(
                "at least one weight must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Rescales the weights to sum to 1.
    #[must_use]
    pub fn normalise(&self) -> Self {
        let sum = self.carbon + self.cost + self.latency;
        Self {
            carbon: self.carbon / sum,
            cost: self.cost / sum,
            latency: self.latency / sum,
        }
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            carbon: 1.0,
            cost: 0.0,
            latency: 0.0,
        }
    }
}

/// Deployable artifact attached to a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Function source text.
    pub code: String,
    /// Dependency list, one requirement per entry.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Entry point symbol; the deployer default applies when omitted.
    #[serde(default)]
    pub entry_point: Option<String>,
}

fn default_deadline_hours() -> u32 {
    24
}

fn default_true() -> bool {
    true
}

/// Canonical descriptor of a registered function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionMetadata {
    pub function_id: FunctionId,
    /// Expected runtime per invocation in milliseconds.
    pub runtime_ms: u64,
    /// Allocated memory in MiB.
    pub memory_mb: u32,
    /// Allocated vCPUs; catalog defaults apply when omitted.
    #[serde(default)]
    pub vcpus: Option<u32>,
    #[serde(default)]
    pub gpu_required: bool,
    #[serde(default)]
    pub gpu_type: Option<String>,
    /// Expected input bytes per invocation, in GB.
    #[serde(default)]
    pub data_input_gb: f64,
    /// Expected output bytes per invocation, in GB.
    #[serde(default)]
    pub data_output_gb: f64,
    /// Region where the function's data originates.
    pub source_region: String,
    #[serde(default)]
    pub invocations_per_day: u32,
    /// Regions the function may run in. Must be a nonempty subset of the
    /// catalog.
    pub allowed_regions: BTreeSet<String>,
    #[serde(default)]
    pub weights: Weights,
    /// Maximum acceptable deferral in hours.
    #[serde(default = "default_deadline_hours")]
    pub deadline_hours: u32,
    /// Measured CPU utilisation in [0, 1], when available.
    #[serde(default)]
    pub cpu_utilization: Option<f64>,
    #[serde(default)]
    pub artifact: Option<ArtifactSpec>,
    /// Whether a prior schedule may be reused for this function.
    #[serde(default = "default_true")]
    pub allow_schedule_caching: bool,
}

impl FunctionMetadata {
    /// Validates the metadata against the catalog.
    ///
    /// Checks the invariants the planner relies on: allowed regions form
    /// a nonempty subset of the catalog, GPU functions have at least one
    /// GPU-capable allowed region, and weights are well formed.
    pub fn validate(&self, catalog: &Catalog) -> Result<()> {
        if self.allowed_regions.is_empty() {
            return Err(CoreError::Validation(format!(
                "{}: allowed_regions is empty",
                self.function_id
            )));
        }
        for region in &self.allowed_regions {
            if !catalog.contains(region) {
                return Err(CoreError::UnknownRegion(region.clone()));
            }
        }
        if !catalog.contains(&self.source_region) {
            return Err(CoreError::UnknownRegion(self.source_region.clone()));
        }
        if self.gpu_required && !self.allowed_regions.iter().any(|r| catalog.has_gpu(r)) {
            return Err(CoreError::Validation(format!(
                "{}: GPU required but no allowed region has GPU hardware",
                self.function_id
            )));
        }
        if let Some(util) = self.cpu_utilization {
            if !(0.0..=1.0).contains(&util) {
                return Err(CoreError::Validation(format!(
                    "{}: cpu_utilization outside [0, 1]",
                    self.function_id
                )));
            }
        }
        self.weights.validate()
    }

    /// The vCPU count to assume for this function.
    pub fn effective_vcpus(&self, catalog: &Catalog) -> u32 {
        self.vcpus.unwrap_or(if self.gpu_required {
            catalog.defaults().vcpus_if_gpu
        } else {
            catalog.defaults().vcpus_default
        })
    }

    /// The CPU utilisation to assume: measured when present, else the
    /// conservative catalog default.
    pub fn effective_cpu_utilization(&self, catalog: &Catalog) -> f64 {
        self.cpu_utilization
            .unwrap_or(catalog.defaults().cpu_utilization)
    }
}
