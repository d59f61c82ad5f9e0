//! Value types flowing through the indicator pipeline.
//!
//! Every stage produces fresh values and hands them forward; nothing here is
//! mutated after construction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::to_instant;

/// Where a reading (or a whole city series) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    Raw,
    Simulated,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provenance::Raw => f.write_str("raw"),
            Provenance::Simulated => f.write_str("simulated"),
        }
    }
}

/// Anything that can be bucketed onto the monthly grid.
pub trait Reading {
    fn city(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
    fn value(&self) -> Option<f64>;
}

/// One raw pollutant reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub value: Option<f64>,
    pub unit: String,
    #[serde(default)]
    pub source: Provenance,
}

impl Reading for Observation {
    fn city(&self) -> &str {
        &self.city
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}

/// One raw transport-activity reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficObservation {
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub traffic_index: Option<f64>,
}

impl Reading for TrafficObservation {
    fn city(&self) -> &str {
        &self.city
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn value(&self) -> Option<f64> {
        self.traffic_index
    }
}

/// A city's value for one calendar month. `value` is `None` only when gap
/// filling was capped by a limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPoint {
    pub month_start: NaiveDate,
    pub city: String,
    pub value: Option<f64>,
}

impl MonthlyPoint {
    pub fn new(month_start: NaiveDate, city: &str, value: Option<f64>) -> Self {
        Self {
            month_start,
            city: city.to_string(),
            value,
        }
    }
}

impl Reading for MonthlyPoint {
    fn city(&self) -> &str {
        &self.city
    }

    fn timestamp(&self) -> DateTime<Utc> {
        to_instant(self.month_start)
    }

    fn value(&self) -> Option<f64> {
        self.value
    }
}

/// A monthly point annotated with difference-in-differences indicators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelRow {
    pub month_start: NaiveDate,
    pub city: String,
    pub value: Option<f64>,
    pub treated: u8,
    pub post: u8,
    pub interaction: u8,
}

/// Outcome of one difference-in-differences fit.
///
/// Non-estimable fits carry NaN in every numeric field; check
/// [`CausalResult::is_estimable`] before display.
#[derive(Debug, Clone, Serialize)]
pub struct CausalResult {
    pub outcome: String,
    pub effect: f64,
    pub standard_error: f64,
    pub p_value: f64,
    pub n_obs: usize,
    pub summary: String,
}

impl CausalResult {
    pub fn is_estimable(&self) -> bool {
        self.effect.is_finite()
    }

    /// Two-sided confidence interval for the effect at the given normal quantile.
    pub fn interval(&self, z: f64) -> (f64, f64) {
        (
            self.effect - z * self.standard_error,
            self.effect + z * self.standard_error,
        )
    }
}

/// One projected month for one city.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub month_start: NaiveDate,
    pub city: String,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// A monthly point with the detector's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyFlag {
    pub month_start: NaiveDate,
    pub city: String,
    pub value: Option<f64>,
    pub is_anomaly: bool,
}

/// Records whether a city's series is measured data or a synthetic stand-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesProvenance {
    pub city: String,
    pub source: Provenance,
    pub reason: Option<String>,
}
