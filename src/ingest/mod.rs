//! Ingestion collaborators: where raw observations come from.
//!
//! The pipeline itself never touches the network. Sources here produce plain
//! [`Observation`] vectors plus a per-city record of whether the series is
//! measured or synthetic.

pub mod openaq;
pub mod simulate;
pub mod traffic;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::calendar::to_instant;
use crate::config::PipelineConfig;
use crate::types::{Observation, Provenance, SeriesProvenance};

pub use openaq::OpenAqSource;
pub use simulate::{simulate_pollution, simulate_traffic};
pub use traffic::{load_or_simulate_traffic, load_traffic_csv};

/// A provider of raw pollutant readings for one city and date range.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch_city(
        &self,
        city: &str,
        parameter: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Observation>>;
}

/// Observations for all cities and where each city's series came from.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub observations: Vec<Observation>,
    pub provenance: Vec<SeriesProvenance>,
}

/// Fetches every configured city in turn.
///
/// A city whose fetch fails, or returns nothing, gets a synthetic series
/// instead; the substitution is logged and recorded in `provenance`.
#[tracing::instrument(skip(source, config), fields(treated = %config.treated_city))]
pub async fn fetch_for_cities<S: ObservationSource + ?Sized>(
    source: &S,
    config: &PipelineConfig,
) -> Ingested {
    let mut out = Ingested::default();

    for (i, city) in config.all_cities().iter().enumerate() {
        let fetched = source
            .fetch_city(city, &config.parameter, config.start_date, config.end_date)
            .await;

        let reason = match fetched {
            Ok(obs) if !obs.is_empty() => {
                info!(city = %city, readings = obs.len(), "fetched measured data");
                out.observations.extend(obs);
                out.provenance.push(SeriesProvenance {
                    city: city.clone(),
                    source: Provenance::Raw,
                    reason: None,
                });
                continue;
            }
            Ok(_) => "source returned no readings".to_string(),
            Err(e) => format!("fetch failed: {e:#}"),
        };

        warn!(city = %city, reason = %reason, "falling back to simulated series");
        let mut rng = simulate::city_rng(config.anomaly.seed, simulate::Stream::Pollution, i);
        out.observations.extend(simulate_pollution(
            city,
            config.start_date,
            config.end_date,
            &mut rng,
        ));
        out.provenance.push(SeriesProvenance {
            city: city.clone(),
            source: Provenance::Simulated,
            reason: Some(reason),
        });
    }

    out
}

/// Per-city provenance of already-loaded observations: a city is measured
/// when at least one of its readings is, simulated otherwise.
pub fn provenance_of(observations: &[Observation]) -> Vec<SeriesProvenance> {
    let mut by_city: std::collections::BTreeMap<&str, Provenance> = Default::default();
    for o in observations {
        let entry = by_city.entry(o.city.as_str()).or_insert(o.source);
        if o.source == Provenance::Raw {
            *entry = Provenance::Raw;
        }
    }
    by_city
        .into_iter()
        .map(|(city, source)| SeriesProvenance {
            city: city.to_string(),
            source,
            reason: None,
        })
        .collect()
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare `YYYY-MM-DD`.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(to_instant(d));
    }
    Err(anyhow!("unrecognised timestamp '{s}'"))
}

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    timestamp: String,
    city: String,
    #[serde(alias = "pm25")]
    value: Option<f64>,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    source: Option<Provenance>,
}

/// Reads raw observations from a CSV with a header row
/// (`timestamp,city,value,unit[,source]`). Empty values become `None`.
pub fn load_observations_csv(path: &Path) -> Result<Vec<Observation>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    reader
        .deserialize::<ObservationRecord>()
        .enumerate()
        .map(|(i, rec)| {
            let rec = rec.with_context(|| format!("{}: bad record {}", path.display(), i + 1))?;
            Ok(Observation {
                timestamp: parse_timestamp(&rec.timestamp)
                    .with_context(|| format!("{}: record {}", path.display(), i + 1))?,
                city: rec.city,
                value: rec.value,
                unit: rec.unit,
                source: rec.source.unwrap_or_default(),
            })
        })
        .collect()
}
