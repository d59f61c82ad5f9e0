//! Indicator Aggregator: monthly tables keyed by (month_start, city) and their
//! full outer join.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::processing::align::{monthly_means, to_grid};
use crate::types::{MonthlyPoint, Reading};

/// One (month, city) row of an [`IndicatorTable`]. `values` lines up with the
/// table's `columns`; `None` marks a combination absent from that input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorRow {
    pub month_start: NaiveDate,
    pub city: String,
    pub values: Vec<Option<f64>>,
}

/// A flat table of named monthly indicators.
///
/// Rows are sorted by `(month_start, city)` and each key appears at most once.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct IndicatorTable {
    pub columns: Vec<String>,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorTable {
    /// Wraps an already-monthly series as a single-column table.
    pub fn from_series(points: &[MonthlyPoint], name: &str) -> Self {
        let mut keyed: BTreeMap<(NaiveDate, &str), Option<f64>> = BTreeMap::new();
        for p in points {
            keyed.insert((p.month_start, p.city.as_str()), p.value);
        }
        Self {
            columns: vec![name.to_string()],
            rows: keyed
                .into_iter()
                .map(|((month_start, city), value)| IndicatorRow {
                    month_start,
                    city: city.to_string(),
                    values: vec![value],
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` for one (month, city), if the row and value exist.
    pub fn get(&self, month_start: NaiveDate, city: &str, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows
            .iter()
            .find(|r| r.month_start == month_start && r.city == city)
            .and_then(|r| r.values[idx])
    }

    /// Extracts one column as a monthly series, keeping null cells.
    pub fn series(&self, column: &str) -> Vec<MonthlyPoint> {
        let Some(idx) = self.column_index(column) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .map(|r| MonthlyPoint::new(r.month_start, &r.city, r.values[idx]))
            .collect()
    }
}

/// Calendar-month mean of each city's readings, one row per month between the
/// city's first and last observed month. Months without readings stay null.
///
/// Re-aggregating a table's own series yields the same table.
#[tracing::instrument(skip(series), fields(readings = series.len()))]
pub fn aggregate<R: Reading>(series: &[R], value_name: &str) -> IndicatorTable {
    let mut keyed: BTreeMap<(NaiveDate, String), Option<f64>> = BTreeMap::new();

    for (city, means) in monthly_means(series) {
        let (months, values) = to_grid(&means);
        for (month, value) in months.into_iter().zip(values) {
            keyed.insert((month, city.clone()), value);
        }
    }

    IndicatorTable {
        columns: vec![value_name.to_string()],
        rows: keyed
            .into_iter()
            .map(|((month_start, city), value)| IndicatorRow {
                month_start,
                city,
                values: vec![value],
            })
            .collect(),
    }
}

/// One table's values for a joined key, if that table has the row.
type Side<'a> = Option<&'a [Option<f64>]>;

/// Full outer join on `(month_start, city)`.
///
/// Rows present in only one input keep nulls for the other input's columns;
/// no row is dropped. Clashing column names get `_x` / `_y` suffixes.
pub fn merge(a: &IndicatorTable, b: &IndicatorTable) -> IndicatorTable {
    let mut columns = Vec::with_capacity(a.columns.len() + b.columns.len());
    for c in &a.columns {
        if b.columns.contains(c) {
            columns.push(format!("{c}_x"));
        } else {
            columns.push(c.clone());
        }
    }
    for c in &b.columns {
        if a.columns.contains(c) {
            columns.push(format!("{c}_y"));
        } else {
            columns.push(c.clone());
        }
    }

    let width_a = a.columns.len();
    let width_b = b.columns.len();

    let mut joined: BTreeMap<(NaiveDate, String), (Side<'_>, Side<'_>)> = BTreeMap::new();
    for r in &a.rows {
        joined
            .entry((r.month_start, r.city.clone()))
            .or_default()
            .0 = Some(r.values.as_slice());
    }
    for r in &b.rows {
        joined
            .entry((r.month_start, r.city.clone()))
            .or_default()
            .1 = Some(r.values.as_slice());
    }

    let rows = joined
        .into_iter()
        .map(|((month_start, city), (left, right))| {
            let mut values = Vec::with_capacity(width_a + width_b);
            match left {
                Some(v) => values.extend_from_slice(v),
                None => values.extend(std::iter::repeat_n(None, width_a)),
            }
            match right {
                Some(v) => values.extend_from_slice(v),
                None => values.extend(std::iter::repeat_n(None, width_b)),
            }
            IndicatorRow {
                month_start,
                city,
                values,
            }
        })
        .collect();

    IndicatorTable { columns, rows }
}
