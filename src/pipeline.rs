//! End-to-end indicator pipeline.
//!
//! Raw readings are aligned once; every model then reads the same monthly
//! panel and none feeds another.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

use crate::anomaly::detect;
use crate::causal::{estimate, prepare};
use crate::config::PipelineConfig;
use crate::forecast::forecast;
use crate::processing::utility::mean;
use crate::processing::{AlignOptions, IndicatorTable, aggregate, align, merge};
use crate::types::{
    AnomalyFlag, CausalResult, ForecastPoint, MonthlyPoint, Observation, TrafficObservation,
};

/// Column name of the aggregated traffic indicator.
pub const TRAFFIC_COLUMN: &str = "traffic_index";

/// Every table the pipeline produces.
#[derive(Debug, Clone)]
pub struct PipelineOutputs {
    pub pollution: Vec<MonthlyPoint>,
    pub traffic: Vec<MonthlyPoint>,
    pub indicators: IndicatorTable,
    pub did: CausalResult,
    pub forecast: Vec<ForecastPoint>,
    pub anomalies: Vec<AnomalyFlag>,
}

/// Dashboard KPIs over the aligned pollution panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Headline {
    /// Mean of all non-null monthly values, all cities pooled.
    pub mean_pollution: Option<f64>,
    pub cities: usize,
    /// Last minus first monthly value of the treated city.
    pub treated_change: Option<f64>,
}

impl PipelineOutputs {
    pub fn headline(&self, treated_city: &str) -> Headline {
        let values: Vec<f64> = self.pollution.iter().filter_map(|p| p.value).collect();
        let cities: BTreeSet<&str> = self.pollution.iter().map(|p| p.city.as_str()).collect();

        let mut treated: Vec<(chrono::NaiveDate, f64)> = self
            .pollution
            .iter()
            .filter(|p| p.city == treated_city)
            .filter_map(|p| p.value.map(|v| (p.month_start, v)))
            .collect();
        treated.sort_by_key(|(m, _)| *m);
        let treated_change = match (treated.first(), treated.last()) {
            (Some((_, first)), Some((_, last))) => Some(last - first),
            _ => None,
        };

        Headline {
            mean_pollution: (!values.is_empty()).then(|| mean(&values)),
            cities: cities.len(),
            treated_change,
        }
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|a| a.is_anomaly).count()
    }
}

pub fn align_options(config: &PipelineConfig) -> AlignOptions {
    AlignOptions {
        method: config.fill_method,
        limit: config.fill_limit,
    }
}

/// Aligns raw pollutant readings onto the monthly panel.
pub fn align_pollution(config: &PipelineConfig, observations: &[Observation]) -> Vec<MonthlyPoint> {
    align(observations, &align_options(config))
}

/// Difference-in-differences on an aligned panel with the configured
/// treated city and intervention date.
pub fn run_did(config: &PipelineConfig, pollution: &[MonthlyPoint]) -> CausalResult {
    let panel = prepare(
        pollution,
        &config.parameter,
        &config.treated_city,
        config.intervention_date,
    );
    estimate(&panel)
}

/// Runs every stage on already-ingested data.
#[tracing::instrument(skip_all, fields(treated = %config.treated_city, readings = observations.len()))]
pub fn run(
    config: &PipelineConfig,
    observations: &[Observation],
    traffic: &[TrafficObservation],
) -> PipelineOutputs {
    let pollution = align_pollution(config, observations);

    let traffic_table = aggregate(traffic, TRAFFIC_COLUMN);
    let traffic_monthly = traffic_table.series(TRAFFIC_COLUMN);
    let indicators = merge(
        &IndicatorTable::from_series(&pollution, &config.parameter),
        &traffic_table,
    );

    let did = run_did(config, &pollution);
    let forecast = forecast(&pollution, config.forecast_horizon);
    let anomalies = detect(&pollution, &config.anomaly);

    let outputs = PipelineOutputs {
        pollution,
        traffic: traffic_monthly,
        indicators,
        did,
        forecast,
        anomalies,
    };
    info!(
        pollution_rows = outputs.pollution.len(),
        indicator_rows = outputs.indicators.len(),
        forecast_rows = outputs.forecast.len(),
        anomalies = outputs.anomaly_count(),
        effect = outputs.did.effect,
        "pipeline completed"
    );
    outputs
}
