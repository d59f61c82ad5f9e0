//! Transport-activity input: a CSV on disk, or a synthetic stand-in.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::config::PipelineConfig;
use crate::ingest::parse_timestamp;
use crate::ingest::simulate::simulate_traffic;
use crate::types::TrafficObservation;

#[derive(Debug, Deserialize)]
struct TrafficRecord {
    timestamp: String,
    city: String,
    traffic_index: Option<f64>,
}

/// Reads `timestamp,city,traffic_index` rows.
pub fn load_traffic_csv(path: &Path) -> Result<Vec<TrafficObservation>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    reader
        .deserialize::<TrafficRecord>()
        .enumerate()
        .map(|(i, rec)| {
            let rec = rec.with_context(|| format!("{}: bad record {}", path.display(), i + 1))?;
            Ok(TrafficObservation {
                timestamp: parse_timestamp(&rec.timestamp)
                    .with_context(|| format!("{}: record {}", path.display(), i + 1))?,
                city: rec.city,
                traffic_index: rec.traffic_index,
            })
        })
        .collect()
}

/// Loads `path` when it exists, otherwise simulates every configured city
/// over the configured range.
pub fn load_or_simulate_traffic(
    path: Option<&Path>,
    config: &PipelineConfig,
) -> Result<Vec<TrafficObservation>> {
    if let Some(path) = path.filter(|p| p.exists()) {
        let rows = load_traffic_csv(path)?;
        info!(path = %path.display(), rows = rows.len(), "loaded traffic data");
        return Ok(rows);
    }
    let rows = simulate_traffic(
        &config.all_cities(),
        config.start_date,
        config.end_date,
        config.anomaly.seed,
    );
    info!(rows = rows.len(), "simulated traffic data");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(format!("urban_indicators_traffic_{name}"))
    }

    #[test]
    fn test_load_traffic_csv() {
        let path = temp_path("load.csv");
        fs::write(
            &path,
            "timestamp,city,traffic_index\n2023-01-01,Delhi,101.5\n2023-02-01,Delhi,\n",
        )
        .unwrap();
        let rows = load_traffic_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].traffic_index, Some(101.5));
        assert_eq!(rows[1].traffic_index, None);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_falls_back_to_simulation() {
        let config = PipelineConfig::default();
        let rows = load_or_simulate_traffic(Some(&temp_path("absent.csv")), &config).unwrap();
        // 5 cities x 24 months
        assert_eq!(rows.len(), 120);
        let none = load_or_simulate_traffic(None, &config).unwrap();
        assert_eq!(rows, none);
    }
}
