use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use chrono::NaiveDate;

use crate::calendar::{add_months, month_range};
use crate::error::{ModelError, ModelResult};
use crate::forecast::sarima::{SarimaModel, SarimaOrder};
use crate::processing::fill::forward_backward_fill;
use crate::processing::utility::group_by_city;
use crate::types::{ForecastPoint, MonthlyPoint};

/// Two-sided 95% intervals.
pub const INTERVAL_ALPHA: f64 = 0.05;

/// Tried in order; the first one the series is long enough for is fitted.
const ORDERS: [SarimaOrder; 3] = [
    SarimaOrder::MONTHLY,
    SarimaOrder::NON_SEASONAL,
    SarimaOrder::RANDOM_WALK,
];

/// Strict monthly cadence from the first to the last month present, with
/// forward-then-backward filled values. `None` when no value is present.
fn regular_series(points: &[&MonthlyPoint]) -> Option<(Vec<NaiveDate>, Vec<f64>)> {
    let by_month: BTreeMap<NaiveDate, Option<f64>> = points
        .iter()
        .map(|p| (p.month_start, p.value.filter(|v| v.is_finite())))
        .collect();
    let (&first, _) = by_month.first_key_value()?;
    let (&last, _) = by_month.last_key_value()?;

    let months = month_range(first, last);
    let raw: Vec<Option<f64>> = months
        .iter()
        .map(|m| by_month.get(m).copied().flatten())
        .collect();
    let values = forward_backward_fill(&raw)?;
    Some((months, values))
}

pub fn select_order(len: usize) -> SarimaOrder {
    ORDERS
        .into_iter()
        .find(|o| len >= o.min_observations())
        .unwrap_or(SarimaOrder::RANDOM_WALK)
}

/// Fits and projects one city's series.
#[tracing::instrument(skip(points), fields(n = points.len()))]
pub fn forecast_city(
    city: &str,
    points: &[&MonthlyPoint],
    horizon: usize,
) -> ModelResult<Vec<ForecastPoint>> {
    let (months, values) =
        regular_series(points).ok_or(ModelError::InsufficientData { needed: 1, got: 0 })?;
    let order = select_order(values.len());
    let model = SarimaModel::fit(&values, order)?;
    debug!(
        %order,
        sigma2 = model.sigma2,
        n_eff = model.n_eff,
        "fitted seasonal model"
    );

    let last = months[months.len() - 1];
    let steps = model.forecast_interval(horizon, INTERVAL_ALPHA)?;
    Ok(steps
        .into_iter()
        .enumerate()
        .map(|(h, (point, lower, upper))| ForecastPoint {
            month_start: add_months(last, h as i32 + 1),
            city: city.to_string(),
            point_estimate: point,
            lower_bound: lower,
            upper_bound: upper,
        })
        .collect())
}

/// Projects `horizon` months past each city's last observed month.
///
/// Cities are fitted independently and in parallel; a city without values or
/// whose fit fails contributes no rows. Output is ordered by city then month.
#[tracing::instrument(skip(series), fields(rows = series.len()))]
pub fn forecast(series: &[MonthlyPoint], horizon: usize) -> Vec<ForecastPoint> {
    if horizon == 0 || series.is_empty() {
        return Vec::new();
    }

    let groups: Vec<(&str, Vec<&MonthlyPoint>)> = group_by_city(series).into_iter().collect();
    groups
        .par_iter()
        .map(|(city, points)| match forecast_city(city, points, horizon) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(city = %city, error = %e, "forecast skipped");
                Vec::new()
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}
