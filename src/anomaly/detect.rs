use rayon::prelude::*;
use tracing::{debug, warn};

use crate::anomaly::isolation_forest::{ForestParams, IsolationForest};
use crate::config::AnomalyConfig;
use crate::error::ModelResult;
use crate::processing::fill::forward_backward_fill;
use crate::processing::utility::group_by_city;
use crate::types::{AnomalyFlag, MonthlyPoint};

impl From<&AnomalyConfig> for ForestParams {
    fn from(cfg: &AnomalyConfig) -> Self {
        Self {
            n_trees: cfg.n_estimators,
            max_samples: cfg.max_samples,
            contamination: cfg.contamination,
            seed: cfg.seed,
        }
    }
}

/// Flags for one city's points, in the order given.
///
/// Values are forward then backward filled for scoring only; the flags carry
/// the original values. A city with no values at all is never anomalous.
pub fn detect_city(
    points: &[&MonthlyPoint],
    params: &ForestParams,
) -> ModelResult<Vec<AnomalyFlag>> {
    let raw: Vec<Option<f64>> = points
        .iter()
        .map(|p| p.value.filter(|v| v.is_finite()))
        .collect();

    let flags = match forward_backward_fill(&raw) {
        Some(filled) => IsolationForest::fit(&filled, params)?.predict(&filled),
        None => vec![false; points.len()],
    };

    Ok(points
        .iter()
        .zip(flags)
        .map(|(p, is_anomaly)| AnomalyFlag {
            month_start: p.month_start,
            city: p.city.clone(),
            value: p.value,
            is_anomaly,
        })
        .collect())
}

/// Labels every point of `series` with a per-city isolation forest verdict.
///
/// The row count is preserved: cities come out in name order, rows within a
/// city keep their input order. A city whose fit fails is reported with all
/// flags cleared.
#[tracing::instrument(skip(series, config), fields(rows = series.len()))]
pub fn detect(series: &[MonthlyPoint], config: &AnomalyConfig) -> Vec<AnomalyFlag> {
    if series.is_empty() {
        return Vec::new();
    }
    let params = ForestParams::from(config);

    let groups: Vec<(&str, Vec<&MonthlyPoint>)> = group_by_city(series).into_iter().collect();
    let flagged: Vec<AnomalyFlag> = groups
        .par_iter()
        .map(|(city, points)| match detect_city(points, &params) {
            Ok(flags) => flags,
            Err(e) => {
                warn!(city = %city, error = %e, "anomaly fit failed; no points flagged");
                points
                    .iter()
                    .map(|p| AnomalyFlag {
                        month_start: p.month_start,
                        city: p.city.clone(),
                        value: p.value,
                        is_anomaly: false,
                    })
                    .collect()
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    debug!(
        flagged = flagged.iter().filter(|f| f.is_anomaly).count(),
        "anomaly detection finished"
    );
    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::add_months;
    use chrono::NaiveDate;

    fn series(city: &str, values: &[Option<f64>]) -> Vec<MonthlyPoint> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MonthlyPoint::new(add_months(start, i as i32), city, *v))
            .collect()
    }

    #[test]
    fn test_single_spike_is_only_flag() {
        let mut values = vec![Some(40.0); 24];
        values.insert(10, Some(500.0));
        let out = detect(&series("Delhi", &values), &AnomalyConfig::default());
        assert_eq!(out.len(), 25);
        let flagged: Vec<usize> = out
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_anomaly)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(flagged, vec![10]);
        assert_eq!(out[10].value, Some(500.0));
    }

    #[test]
    fn test_empty_input() {
        assert!(detect(&[], &AnomalyConfig::default()).is_empty());
    }

    #[test]
    fn test_missing_values_kept_in_output() {
        let mut values = vec![Some(20.0); 12];
        values[3] = None;
        let out = detect(&series("Kolkata", &values), &AnomalyConfig::default());
        assert_eq!(out.len(), 12);
        assert_eq!(out[3].value, None);
        assert!(out.iter().all(|f| !f.is_anomaly));
    }

    #[test]
    fn test_city_without_values() {
        let mut input = series("Chennai", &[None, None]);
        input.extend(series("Bengaluru", &[Some(1.0); 6]));
        let out = detect(&input, &AnomalyConfig::default());
        assert_eq!(out.len(), 8);
        assert_eq!(out[0].city, "Bengaluru");
        assert!(out.iter().all(|f| !f.is_anomaly));
    }

    #[test]
    fn test_within_city_order_preserved() {
        let mut input = series("Mumbai", &[Some(3.0), Some(1.0), Some(2.0)]);
        input.reverse();
        let out = detect(&input, &AnomalyConfig::default());
        let months: Vec<NaiveDate> = out.iter().map(|f| f.month_start).collect();
        let expected: Vec<NaiveDate> = input.iter().map(|p| p.month_start).collect();
        assert_eq!(months, expected);
    }
}
