//! Carbon intensity forecasts.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// How the forecast values were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastMode {
    /// True forward-looking forecast from the provider.
    Forecast,
    /// Past 24 hours reinterpreted as the next 24 hours.
    Historical,
}

/// One hourly forecast point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Start of the hour, UTC, minute-aligned to zero.
    pub hour_start_utc: DateTime<Utc>,
    /// Grid carbon intensity in gCO2eq per kWh.
    pub carbon_intensity: f64,
}

/// Hourly forecast for a single grid zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneForecast {
    pub zone: String,
    pub points: Vec<ForecastPoint>,
}

impl ZoneForecast {
    /// Validates the ordering invariants: hours contiguous and strictly
    /// increasing, values nonnegative.
    pub fn validate(&self) -> Result<()> {
        if self.points.is_empty() {
            return Err(CoreError::Validation(format!(
                "zone {}: empty forecast",
                self.zone
            )));
        }
        for point in &self.points {
            if point.carbon_intensity < 0.0 || !point.carbon_intensity.is_finite() {
                return Err(CoreError::Validation(format!(
                    "zone {}: negative carbon intensity at {}",
                    self.zone, point.hour_start_utc
                )));
            }
            if point.hour_start_utc.minute() != 0 || point.hour_start_utc.second() != 0 {
                return Err(CoreError::Validation(format!(
                    "zone {}: point {} is not hour-aligned",
                    self.zone, point.hour_start_utc
                )));
            }
        }
        for pair in self.points.windows(2) {
            if pair[1].hour_start_utc - pair[0].hour_start_utc != Duration::hours(1) {
                return Err(CoreError::Validation(format!(
                    "zone {}: hours not contiguous around {}",
                    self.zone, pair[0].hour_start_utc
                )));
            }
        }
        Ok(())
    }

    /// Carbon intensity at the hour starting at `hour`, if covered.
    pub fn intensity_at(&self, hour: DateTime<Utc>) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.hour_start_utc == hour)
            .map(|p| p.carbon_intensity)
    }

    /// Returns a copy with every timestamp shifted forward.
    ///
    /// Used in historical mode to reinterpret the past 24 hours as the
    /// next 24 hours.
    #[must_use]
    pub fn shifted(&self, hours: i64) -> Self {
        Self {
            zone: self.zone.clone(),
            points: self
                .points
                .iter()
                .map(|p| ForecastPoint {
                    hour_start_utc: p.hour_start_utc + Duration::hours(hours),
                    carbon_intensity: p.carbon_intensity,
                })
                .collect(),
        }
    }
}

/// Merged forecast document, persisted as `carbon_forecasts.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastDocument {
    pub fetched_at_utc: DateTime<Utc>,
    pub mode: ForecastMode,
    pub zones: BTreeMap<String, ZoneForecast>,
    /// Zones that failed to fetch this cycle; planning proceeds without
    /// them.
    #[serde(default)]
    pub failed_zones: Vec<String>,
}

impl ForecastDocument {
    /// Validates every zone in the document.
    pub fn validate(&self) -> Result<()> {
        if self.zones.is_empty() {
            return Err(CoreError::Validation(
                "forecast document has no zones".into(),
            ));
        }
        for zone in self.zones.values() {
            zone.validate()?;
        }
        Ok(())
    }

    /// Carbon intensity for `zone` at `hour`, if covered.
    pub fn intensity_at(&self, zone: &str, hour: DateTime<Utc>) -> Option<f64> {
        self.zones.get(zone)?.intensity_at(hour)
    }
}
