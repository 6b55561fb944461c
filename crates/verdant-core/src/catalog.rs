//! Static region catalog.
//!
//! The catalog maps cloud regions to forecast-provider grid zones and
//! carries the power constants the scorer needs. It is loaded once at
//! startup from `static_config.json` in the configuration bucket and is
//! never reloaded; a load failure is fatal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Per-region power model constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerProfile {
    /// Idle CPU draw per vCPU in watts.
    pub cpu_min_w_per_vcpu: f64,
    /// Fully-utilised CPU draw per vCPU in watts.
    pub cpu_max_w_per_vcpu: f64,
    /// Memory draw per allocated GiB in watts.
    pub mem_w_per_gib: f64,
    /// Idle GPU draw per accelerator in watts, if the region has GPUs.
    pub gpu_min_w: Option<f64>,
    /// Fully-utilised GPU draw per accelerator in watts.
    pub gpu_max_w: Option<f64>,
    /// Power-usage effectiveness of the region's facilities.
    pub pue: f64,
}

/// A single region entry in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionEntry {
    /// Human-readable region name.
    pub name: String,
    /// Grid zone key understood by the forecast provider.
    pub zone: String,
    /// Egress rate in USD per GB leaving this region.
    pub egress_usd_per_gb: f64,
    /// Pricing tier label.
    #[serde(default)]
    pub pricing_tier: String,
    /// Whether GPU hardware is present in this region.
    #[serde(default)]
    pub has_gpu: bool,
    /// Accelerator model available, when `has_gpu` is set.
    #[serde(default)]
    pub gpu_type: Option<String>,
    /// Power model for this region.
    pub power: PowerProfile,
}

/// Catalog-wide defaults used when function metadata leaves a field open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDefaults {
    /// Network transfer energy in kWh per GB moved.
    pub network_kwh_per_gb: f64,
    /// Conservative CPU utilisation assumed when none was measured.
    pub cpu_utilization: f64,
    /// GPU utilisation used for all GPU workloads.
    pub gpu_utilization: f64,
    /// vCPUs assumed for CPU-only functions that omit the field.
    pub vcpus_default: u32,
    /// vCPUs assumed for GPU functions that omit the field.
    pub vcpus_if_gpu: u32,
}

impl Default for CatalogDefaults {
    fn default() -> Self {
        Self {
            network_kwh_per_gb: 0.002,
            cpu_utilization: 0.10,
            gpu_utilization: 0.10,
            vcpus_default: 1,
            vcpus_if_gpu: 8,
        }
    }
}

/// The static region catalog.
///
/// Read-only after construction. Lookups return `None` (or zero for
/// egress between identical regions) rather than panicking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    regions: BTreeMap<String, RegionEntry>,
    #[serde(default)]
    defaults: CatalogDefaults,
}

impl Catalog {
    /// Builds a catalog from parts, validating every entry.
    pub fn new(
        regions: BTreeMap<String, RegionEntry>,
        defaults: CatalogDefaults,
    ) -> Result<Self> {
        let catalog = Self { regions, defaults };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parses a catalog from the `static_config.json` document.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let catalog: Self = serde_json::from_slice(data)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(CoreError::Validation("catalog has no regions".into()));
        }
        for (key, entry) in &self.regions {
            let p = &entry.power;
            if !(1.0..=2.0).contains(&p.pue) {
                return Err(CoreError::Validation(format!(
                    "region {key}: PUE {} outside [1.0, 2.0]",
                    p.pue
                )));
            }
            if p.cpu_max_w_per_vcpu < p.cpu_min_w_per_vcpu {
                return Err(CoreError::Validation(format!(
                    "region {key}: cpu max W below min W"
                )));
            }
            match (p.gpu_min_w, p.gpu_max_w) {
                (Some(min), Some(max)) if max < min => {
                    return Err(CoreError::Validation(format!(
                        "region {key}: gpu max W below min W"
                    )));
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(CoreError::Validation(format!(
                        "region {key}: gpu power bounds must be given together"
                    )));
                }
                _ => {}
            }
            if entry.has_gpu && p.gpu_max_w.is_none() {
                return Err(CoreError::Validation(format!(
                    "region {key}: has_gpu set but no gpu power profile"
                )));
            }
            if entry.egress_usd_per_gb < 0.0 {
                return Err(CoreError::Validation(format!(
                    "region {key}: negative egress rate"
                )));
            }
        }
        Ok(())
    }

    /// Returns the forecast-provider zone for a region.
    pub fn zone_of(&self, region: &str) -> Option<&str> {
        self.regions.get(region).map(|r| r.zone.as_str())
    }

    /// Egress rate in USD/GB for data leaving `from` towards `to`.
    ///
    /// Transfers within a single region are free.
    pub fn egress_rate(&self, from: &str, to: &str) -> f64 {
        if from == to {
            return 0.0;
        }
        self.regions
            .get(from)
            .map_or(0.0, |r| r.egress_usd_per_gb)
    }

    /// Power model for a region.
    pub fn power(&self, region: &str) -> Option<&PowerProfile> {
        self.regions.get(region).map(|r| &r.power)
    }

    /// Whether a region has GPU hardware.
    pub fn has_gpu(&self, region: &str) -> bool {
        self.regions.get(region).is_some_and(|r| r.has_gpu)
    }

    /// Whether a region key exists in the catalog.
    pub fn contains(&self, region: &str) -> bool {
        self.regions.contains_key(region)
    }

    /// Full entry lookup.
    pub fn region(&self, region: &str) -> Option<&RegionEntry> {
        self.regions.get(region)
    }

    /// All region keys, in sorted order.
    pub fn region_keys(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    /// Catalog-wide defaults.
    pub fn defaults(&self) -> &CatalogDefaults {
        &self.defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power(pue: f64) -> PowerProfile {
        PowerProfile {
            cpu_min_w_per_vcpu: 1.0,
            cpu_max_w_per_vcpu: 4.0,
            mem_w_per_gib: 0.4,
            gpu_min_w: None,
            gpu_max_w: None,
            pue,
        }
    }

    fn entry(zone: &str, egress: f64) -> RegionEntry {
        RegionEntry {
            name: zone.to_string(),
            zone: zone.to_string(),
            egress_usd_per_gb: egress,
            pricing_tier: "standard".to_string(),
            has_gpu: false,
            gpu_type: None,
            power: power(1.1),
        }
    }

    fn two_region_catalog() -> Catalog {
        let mut regions = BTreeMap::new();
        regions.insert("eu-north".to_string(), entry("SE-SE3", 0.02));
        regions.insert("eu-west".to_string(), entry("BE", 0.05));
        Catalog::new(regions, CatalogDefaults::default()).unwrap()
    }

    #[test]
    fn lookups() {
        let catalog = two_region_catalog();
        assert_eq!(catalog.zone_of("eu-north"), Some("SE-SE3"));
        assert_eq!(catalog.zone_of("nowhere"), None);
        assert!(catalog.contains("eu-west"));
        assert!(!catalog.has_gpu("eu-west"));
    }

    #[test]
    fn egress_within_region_is_free() {
        let catalog = two_region_catalog();
        assert_eq!(catalog.egress_rate("eu-west", "eu-west"), 0.0);
        assert!((catalog.egress_rate("eu-west", "eu-north") - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_pue_out_of_range() {
        let mut regions = BTreeMap::new();
        let mut bad = entry("DE", 0.01);
        bad.power.pue = 2.5;
        regions.insert("eu-central".to_string(), bad);
        assert!(Catalog::new(regions, CatalogDefaults::default()).is_err());
    }

    #[test]
    fn rejects_inverted_cpu_bounds() {
        let mut regions = BTreeMap::new();
        let mut bad = entry("DE", 0.01);
        bad.power.cpu_max_w_per_vcpu = 0.5;
        regions.insert("eu-central".to_string(), bad);
        assert!(Catalog::new(regions, CatalogDefaults::default()).is_err());
    }

    #[test]
    fn rejects_gpu_flag_without_power() {
        let mut regions = BTreeMap::new();
        let mut bad = entry("DE", 0.01);
        bad.has_gpu = true;
        regions.insert("eu-central".to_string(), bad);
        assert!(Catalog::new(regions, CatalogDefaults::default()).is_err());
    }

    #[test]
    fn json_round_trip() {
        let catalog = two_region_catalog();
        let json = serde_json::to_vec(&catalog).unwrap();
        let parsed = Catalog::from_json(&json).unwrap();
        assert_eq!(parsed.zone_of("eu-north"), Some("SE-SE3"));
    }
}
