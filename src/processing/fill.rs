//! Gap filling on a regular monthly grid.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How interior gaps are interpolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FillMethod {
    /// Straight line by position, ignoring month lengths.
    Linear,
    /// Straight line weighted by elapsed days between month starts.
    #[default]
    Time,
    /// Value of the closer known neighbour; ties go to the earlier one.
    Nearest,
}

/// Fills interior runs of `None` in `values`.
///
/// `months` gives the grid position of each value. Leading and trailing gaps
/// have only one neighbour and are left untouched. When `limit` is set, a run
/// longer than `limit` stays entirely empty.
pub fn interpolate(
    months: &[NaiveDate],
    values: &[Option<f64>],
    method: FillMethod,
    limit: Option<usize>,
) -> Vec<Option<f64>> {
    debug_assert_eq!(months.len(), values.len());
    let mut out = values.to_vec();

    let mut prev_known: Option<usize> = None;
    let mut i = 0;
    while i < values.len() {
        if values[i].is_some() {
            prev_known = Some(i);
            i += 1;
            continue;
        }

        let run_start = i;
        while i < values.len() && values[i].is_none() {
            i += 1;
        }
        let run_len = i - run_start;

        let (Some(left), true) = (prev_known, i < values.len()) else {
            continue;
        };
        if limit.is_some_and(|l| run_len > l) {
            continue;
        }
        let right = i;
        let (y0, y1) = match (values[left], values[right]) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };

        for k in run_start..right {
            out[k] = Some(match method {
                FillMethod::Linear => {
                    let w = (k - left) as f64 / (right - left) as f64;
                    y0 + w * (y1 - y0)
                }
                FillMethod::Time => {
                    let span = (months[right] - months[left]).num_days() as f64;
                    let w = (months[k] - months[left]).num_days() as f64 / span;
                    y0 + w * (y1 - y0)
                }
                FillMethod::Nearest => {
                    let to_left = (months[k] - months[left]).num_days();
                    let to_right = (months[right] - months[k]).num_days();
                    if to_left <= to_right { y0 } else { y1 }
                }
            });
        }
    }

    out
}

/// Carries the last known value forward over gaps.
pub fn forward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = *v;
            }
            last
        })
        .collect()
}

/// Carries the next known value backward over gaps.
pub fn backward_fill(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut reversed: Vec<Option<f64>> = values.iter().rev().copied().collect();
    reversed = forward_fill(&reversed);
    reversed.reverse();
    reversed
}

/// Forward fill, then backward fill. `None` when no value is known at all.
pub fn forward_backward_fill(values: &[Option<f64>]) -> Option<Vec<f64>> {
    backward_fill(&forward_fill(values))
        .into_iter()
        .collect::<Option<Vec<f64>>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::month_range;

    fn months(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        month_range(start, crate::calendar::add_months(start, n as i32 - 1))
    }

    #[test]
    fn test_linear_fills_by_position() {
        let v = vec![Some(0.0), None, None, Some(3.0)];
        let out = interpolate(&months(4), &v, FillMethod::Linear, None);
        assert_eq!(out, vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_time_weights_by_days() {
        // Jan 1 -> Feb 1 is 31 days, Feb 1 -> Mar 1 is 28 days.
        let v = vec![Some(0.0), None, Some(59.0)];
        let out = interpolate(&months(3), &v, FillMethod::Time, None);
        assert!((out[1].unwrap() - 31.0).abs() < 1e-12);
    }

    #[test]
    fn test_nearest_picks_closer_neighbour() {
        let v = vec![Some(1.0), None, None, Some(9.0)];
        let out = interpolate(&months(4), &v, FillMethod::Nearest, None);
        assert_eq!(out, vec![Some(1.0), Some(1.0), Some(9.0), Some(9.0)]);
    }

    #[test]
    fn test_limit_leaves_long_runs_empty() {
        let v = vec![Some(1.0), None, None, Some(4.0), None, Some(6.0)];
        let out = interpolate(&months(6), &v, FillMethod::Linear, Some(1));
        assert_eq!(out[1], None);
        assert_eq!(out[2], None);
        assert_eq!(out[4], Some(5.0));
    }

    #[test]
    fn test_edges_untouched() {
        let v = vec![None, Some(2.0), None];
        let out = interpolate(&months(3), &v, FillMethod::Linear, None);
        assert_eq!(out, v);
    }

    #[test]
    fn test_forward_backward_fill() {
        let v = vec![None, Some(2.0), None, Some(5.0), None];
        assert_eq!(
            forward_backward_fill(&v),
            Some(vec![2.0, 2.0, 2.0, 5.0, 5.0])
        );
        assert_eq!(forward_backward_fill(&[None, None]), None);
        assert_eq!(forward_backward_fill(&[]), Some(vec![]));
    }
}
