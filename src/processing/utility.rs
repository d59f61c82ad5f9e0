use std::collections::BTreeMap;

use crate::types::MonthlyPoint;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Splits a panel into per-city slices, keeping each city's rows in input order.
/// Cities come out sorted by name.
pub fn group_by_city(points: &[MonthlyPoint]) -> BTreeMap<&str, Vec<&MonthlyPoint>> {
    let mut groups: BTreeMap<&str, Vec<&MonthlyPoint>> = BTreeMap::new();
    for p in points {
        groups.entry(p.city.as_str()).or_default().push(p);
    }
    groups
}
