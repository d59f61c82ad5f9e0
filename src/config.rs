//! Immutable pipeline configuration.
//!
//! Stored as a plain JSON object on disk; every key is optional:
//! ```json
//! {
//!   "treated_city": "Delhi",
//!   "control_cities": ["Mumbai", "Kolkata"],
//!   "intervention_date": "2023-07-01",
//!   "fill_method": "time",
//!   "forecast_horizon": 6
//! }
//! ```

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::processing::fill::FillMethod;

/// Everything the pipeline entry points need, passed explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub treated_city: String,
    pub control_cities: Vec<String>,
    /// Pollutant requested from the ingestion source.
    pub parameter: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub intervention_date: NaiveDate,
    /// Local policy dates per city. Informational; the DiD uses `intervention_date`.
    pub city_dates: BTreeMap<String, NaiveDate>,
    pub fill_method: FillMethod,
    pub fill_limit: Option<usize>,
    pub forecast_horizon: usize,
    pub anomaly: AnomalyConfig,
    pub output_dir: PathBuf,
    /// Gzip CSV outputs.
    pub gzip: bool,
}

/// Isolation forest settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Expected share of anomalous points per city.
    pub contamination: f64,
    pub seed: u64,
    pub n_estimators: usize,
    pub max_samples: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.02,
            seed: 42,
            n_estimators: 100,
            max_samples: 256,
        }
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let city_dates = [
            ("Delhi", ymd(2023, 7, 1)),
            ("Mumbai", ymd(2023, 8, 15)),
            ("Bengaluru", ymd(2023, 9, 1)),
            ("Kolkata", ymd(2023, 10, 5)),
            ("Chennai", ymd(2023, 11, 20)),
        ]
        .into_iter()
        .map(|(c, d)| (c.to_string(), d))
        .collect();

        Self {
            treated_city: "Delhi".to_string(),
            control_cities: ["Mumbai", "Bengaluru", "Kolkata", "Chennai"]
                .into_iter()
                .map(String::from)
                .collect(),
            parameter: "pm25".to_string(),
            start_date: ymd(2023, 1, 1),
            end_date: ymd(2024, 12, 31),
            intervention_date: ymd(2023, 7, 1),
            city_dates,
            fill_method: FillMethod::Time,
            fill_limit: None,
            forecast_horizon: 6,
            anomaly: AnomalyConfig::default(),
            output_dir: PathBuf::from("outputs"),
            gzip: false,
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path` and validates it.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{path}'"))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Treated city first, then controls.
    pub fn all_cities(&self) -> Vec<String> {
        std::iter::once(self.treated_city.clone())
            .chain(self.control_cities.iter().cloned())
            .collect()
    }

    /// Returns a copy with a different treated city, dropping it from the controls.
    pub fn with_treated(mut self, city: &str) -> Self {
        self.control_cities.retain(|c| c != city);
        self.treated_city = city.to_string();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.treated_city.trim().is_empty() {
            bail!("treated_city must not be empty");
        }
        if self.control_cities.contains(&self.treated_city) {
            bail!(
                "treated city '{}' is also listed as a control",
                self.treated_city
            );
        }
        if self.start_date > self.end_date {
            bail!(
                "start_date {} is after end_date {}",
                self.start_date,
                self.end_date
            );
        }
        let c = self.anomaly.contamination;
        if !(c > 0.0 && c <= 0.5) {
            bail!("anomaly.contamination must be in (0, 0.5], got {c}");
        }
        if self.anomaly.n_estimators == 0 || self.anomaly.max_samples == 0 {
            bail!("anomaly.n_estimators and anomaly.max_samples must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.all_cities()[0], "Delhi");
        assert_eq!(config.all_cities().len(), 5);
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let path = temp_path("urban_indicators_config_partial.json");
        fs::write(
            &path,
            r#"{"treated_city": "Mumbai", "control_cities": ["Delhi"], "fill_method": "nearest"}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.treated_city, "Mumbai");
        assert_eq!(config.fill_method, FillMethod::Nearest);
        assert_eq!(config.forecast_horizon, 6);
        assert_eq!(config.anomaly.seed, 42);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_validate_rejects_treated_in_controls() {
        let mut config = PipelineConfig::default();
        config.control_cities.push("Delhi".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let config = PipelineConfig {
            start_date: ymd(2025, 1, 1),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_treated_moves_city_out_of_controls() {
        let config = PipelineConfig::default().with_treated("Kolkata");
        assert_eq!(config.treated_city, "Kolkata");
        assert!(!config.control_cities.contains(&"Kolkata".to_string()));
        config.validate().unwrap();
    }
}
