//! Panel Aligner: irregular readings onto a gap-free monthly grid per city.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::debug;

use crate::calendar::{month_range, month_start};
use crate::processing::fill::{FillMethod, interpolate};
use crate::processing::utility::mean;
use crate::types::{MonthlyPoint, Reading};

/// Gap-filling settings for [`align`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlignOptions {
    pub method: FillMethod,
    /// Longest run of missing months that may be filled.
    pub limit: Option<usize>,
}

/// Per-city monthly means of the non-null readings, keyed by month start.
///
/// Cities without a single usable reading do not appear.
pub fn monthly_means<R: Reading>(readings: &[R]) -> BTreeMap<String, BTreeMap<NaiveDate, f64>> {
    let mut buckets: BTreeMap<String, BTreeMap<NaiveDate, Vec<f64>>> = BTreeMap::new();

    for r in readings {
        let Some(v) = r.value().filter(|v| !v.is_nan()) else {
            continue;
        };
        buckets
            .entry(r.city().to_string())
            .or_default()
            .entry(month_start(r.timestamp()))
            .or_default()
            .push(v);
    }

    buckets
        .into_iter()
        .map(|(city, months)| {
            let means = months
                .into_iter()
                .map(|(month, values)| (month, mean(&values)))
                .collect();
            (city, means)
        })
        .collect()
}

/// Lays a city's monthly means onto every month between its first and last
/// observed month. Months without readings become `None`.
pub fn to_grid(means: &BTreeMap<NaiveDate, f64>) -> (Vec<NaiveDate>, Vec<Option<f64>>) {
    let (Some(first), Some(last)) = (means.keys().next(), means.keys().next_back()) else {
        return (Vec::new(), Vec::new());
    };
    let months = month_range(*first, *last);
    let values = months.iter().map(|m| means.get(m).copied()).collect();
    (months, values)
}

/// Resamples readings to calendar-month means per city and fills interior gaps.
///
/// Output is ordered by city, then month, with exactly one row per month from
/// each city's first to last observed month. Empty input yields empty output.
#[tracing::instrument(skip(readings), fields(readings = readings.len()))]
pub fn align<R: Reading>(readings: &[R], options: &AlignOptions) -> Vec<MonthlyPoint> {
    let mut out = Vec::new();

    for (city, means) in monthly_means(readings) {
        let (months, values) = to_grid(&means);
        let gaps = values.iter().filter(|v| v.is_none()).count();
        let filled = interpolate(&months, &values, options.method, options.limit);

        debug!(
            city = %city,
            months = months.len(),
            gaps,
            "aligned city series"
        );

        out.extend(
            months
                .into_iter()
                .zip(filled)
                .map(|(month, value)| MonthlyPoint::new(month, &city, value)),
        );
    }

    out
}
