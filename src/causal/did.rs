//! Difference-in-differences with two-way (city × month) fixed effects.
//!
//! Model: `y_it = α_i + λ_t + δ·(treated_i × post_t) + ε_it`, fitted by OLS.
//! The city and month dummies are absorbed with [`FixedEffectsSolver`]; by the
//! Frisch–Waugh–Lovell theorem the interaction coefficient and its HC1
//! variance then follow from the demeaned interaction and outcome alone:
//!
//! - `δ = Σ d̃ ỹ / Σ d̃²`
//! - `Var(δ) = n/(n-k) · Σ d̃² e² / (Σ d̃²)²`, `k` = absorbed parameters + 1
//!
//! p-values are two-sided against the standard normal.

use chrono::NaiveDate;
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt::Write as _;
use tracing::{info, warn};

use super::fixed_effects::{FixedEffectsSolver, dense_ids};
use crate::calendar::month_label;
use crate::error::{ModelError, ModelResult};
use crate::types::{CausalResult, MonthlyPoint, PanelRow};

/// Relative size below which the demeaned interaction counts as collinear
/// with the fixed effects.
const COLLINEAR_TOL: f64 = 1e-10;

/// Standard normal 0.975 quantile.
const Z_95: f64 = 1.959_963_984_540_054;

/// Panel rows ready for [`estimate`], with the labels needed for reporting.
#[derive(Debug, Clone)]
pub struct DidPanel {
    pub outcome: String,
    pub treated_city: String,
    pub intervention: NaiveDate,
    pub rows: Vec<PanelRow>,
}

/// Annotates every monthly point with treated / post / interaction flags.
///
/// `post` is 1 from `intervention` onward (inclusive) regardless of city;
/// `treated` is 1 only for `treated_city`.
pub fn prepare(
    panel: &[MonthlyPoint],
    outcome: &str,
    treated_city: &str,
    intervention: NaiveDate,
) -> DidPanel {
    let rows = panel
        .iter()
        .map(|p| {
            let treated = u8::from(p.city == treated_city);
            let post = u8::from(p.month_start >= intervention);
            PanelRow {
                month_start: p.month_start,
                city: p.city.clone(),
                value: p.value,
                treated,
                post,
                interaction: treated * post,
            }
        })
        .collect();

    DidPanel {
        outcome: outcome.to_string(),
        treated_city: treated_city.to_string(),
        intervention,
        rows,
    }
}

/// Intermediate quantities of a successful fit.
#[derive(Debug, Clone)]
struct DidFit {
    effect: f64,
    se_hc1: f64,
    se_ols: f64,
    p_value: f64,
    n_obs: usize,
    n_cities: usize,
    n_months: usize,
    df_resid: f64,
    r_squared_within: f64,
}

/// Fits the two-way fixed-effects regression and reports the interaction term.
///
/// Rows with a missing or non-finite outcome are dropped first. A fit that
/// cannot identify the interaction (no treated rows, no post-period, or
/// collinearity with the fixed effects) returns NaN-valued fields.
#[tracing::instrument(skip(panel), fields(outcome = %panel.outcome, treated = %panel.treated_city, rows = panel.rows.len()))]
pub fn estimate(panel: &DidPanel) -> CausalResult {
    match fit(&panel.rows) {
        Ok(fit) => {
            info!(
                effect = fit.effect,
                se = fit.se_hc1,
                p_value = fit.p_value,
                n_obs = fit.n_obs,
                "DiD fit complete"
            );
            let mut result = CausalResult {
                outcome: panel.outcome.clone(),
                effect: fit.effect,
                standard_error: fit.se_hc1,
                p_value: fit.p_value,
                n_obs: fit.n_obs,
                summary: String::new(),
            };
            result.summary = render_summary(panel, &fit, result.interval(Z_95));
            result
        }
        Err(e) => {
            warn!(error = %e, "DiD interaction not estimable");
            let n_obs = usable_rows(&panel.rows).count();
            CausalResult {
                outcome: panel.outcome.clone(),
                effect: f64::NAN,
                standard_error: f64::NAN,
                p_value: f64::NAN,
                n_obs,
                summary: format!(
                    "Difference-in-differences: {} ~ treated×post + C(city) + C(month)\n\
                     Treated city: {}   Intervention: {}\n\
                     Not estimable: {e}\n",
                    panel.outcome, panel.treated_city, panel.intervention
                ),
            }
        }
    }
}

fn usable_rows(rows: &[PanelRow]) -> impl Iterator<Item = (&PanelRow, f64)> {
    rows.iter()
        .filter_map(|r| r.value.filter(|v| v.is_finite()).map(|v| (r, v)))
}

fn fit(rows: &[PanelRow]) -> ModelResult<DidFit> {
    let usable: Vec<(&PanelRow, f64)> = usable_rows(rows).collect();
    let n = usable.len();
    if n == 0 {
        return Err(ModelError::InsufficientData { needed: 1, got: 0 });
    }

    let y: Vec<f64> = usable.iter().map(|(_, v)| *v).collect();
    let d: Vec<f64> = usable.iter().map(|(r, _)| f64::from(r.interaction)).collect();
    let cities: Vec<&str> = usable.iter().map(|(r, _)| r.city.as_str()).collect();
    let months: Vec<NaiveDate> = usable.iter().map(|(r, _)| r.month_start).collect();

    let ss_d: f64 = d.iter().map(|v| v * v).sum();
    if ss_d == 0.0 {
        return Err(ModelError::Singular(
            "interaction term is identically zero".into(),
        ));
    }

    let solver = FixedEffectsSolver::new(vec![dense_ids(&cities), dense_ids(&months)])?;
    let levels = solver.levels();
    let d_dm = solver.partial_out(&d)?;
    let y_dm = solver.partial_out(&y)?;

    let ss_dd: f64 = d_dm.iter().map(|v| v * v).sum();
    if ss_dd < COLLINEAR_TOL * ss_d {
        return Err(ModelError::Singular(
            "interaction term is collinear with the fixed effects".into(),
        ));
    }

    let effect = d_dm.iter().zip(&y_dm).map(|(a, b)| a * b).sum::<f64>() / ss_dd;
    let resid: Vec<f64> = y_dm
        .iter()
        .zip(&d_dm)
        .map(|(yv, dv)| yv - effect * dv)
        .collect();

    let k = solver.degrees_of_freedom_absorbed() + 1;
    let df_resid = n as f64 - k as f64;

    let meat: f64 = d_dm
        .iter()
        .zip(&resid)
        .map(|(dv, e)| dv * dv * e * e)
        .sum();
    let rss: f64 = resid.iter().map(|e| e * e).sum();
    let (se_hc1, se_ols) = if df_resid > 0.0 {
        let hc1 = (n as f64 / df_resid) * meat / (ss_dd * ss_dd);
        let ols = rss / df_resid / ss_dd;
        (hc1.max(0.0).sqrt(), ols.max(0.0).sqrt())
    } else {
        (f64::NAN, f64::NAN)
    };

    let p_value = two_sided_p(effect, se_hc1)?;

    let tss: f64 = y_dm.iter().map(|v| v * v).sum();
    let r_squared_within = if tss > 0.0 { 1.0 - rss / tss } else { 1.0 };

    Ok(DidFit {
        effect,
        se_hc1,
        se_ols,
        p_value,
        n_obs: n,
        n_cities: levels[0],
        n_months: levels[1],
        df_resid,
        r_squared_within,
    })
}

/// Two-sided normal p-value for `effect / se`.
fn two_sided_p(effect: f64, se: f64) -> ModelResult<f64> {
    if !se.is_finite() {
        return Ok(f64::NAN);
    }
    if se == 0.0 {
        return Ok(if effect == 0.0 { f64::NAN } else { 0.0 });
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| ModelError::InvalidInput(format!("standard normal: {e}")))?;
    let z = (effect / se).abs();
    Ok(2.0 * (1.0 - normal.cdf(z)))
}

fn render_summary(panel: &DidPanel, fit: &DidFit, (lower, upper): (f64, f64)) -> String {
    let first = panel.rows.iter().map(|r| r.month_start).min();
    let last = panel.rows.iter().map(|r| r.month_start).max();

    let mut s = String::new();
    let _ = writeln!(
        s,
        "Difference-in-differences: {} ~ treated×post + C(city) + C(month)",
        panel.outcome
    );
    let _ = writeln!(s, "{}", "=".repeat(72));
    let _ = writeln!(
        s,
        "Treated city: {:<20} Intervention: {}",
        panel.treated_city, panel.intervention
    );
    if let (Some(first), Some(last)) = (first, last) {
        let _ = writeln!(
            s,
            "Months: {} .. {}   Cities: {}   Month effects: {}",
            month_label(first),
            month_label(last),
            fit.n_cities,
            fit.n_months
        );
    }
    let _ = writeln!(
        s,
        "Observations: {:<8} Residual df: {:<8} Within R²: {:.4}",
        fit.n_obs, fit.df_resid, fit.r_squared_within
    );
    let _ = writeln!(s, "Covariance type: HC1");
    let _ = writeln!(s, "{}", "-".repeat(72));
    let _ = writeln!(
        s,
        "{:<16}{:>10}{:>10}{:>10}{:>10}{:>12}{:>12}",
        "", "coef", "std err", "z", "P>|z|", "[0.025", "0.975]"
    );
    let zstat = fit.effect / fit.se_hc1;
    let _ = writeln!(
        s,
        "{:<16}{:>10.4}{:>10.4}{:>10.3}{:>10.3}{:>12.4}{:>12.4}",
        "treated×post",
        fit.effect,
        fit.se_hc1,
        zstat,
        fit.p_value,
        lower,
        upper
    );
    let _ = writeln!(s, "{}", "-".repeat(72));
    let _ = writeln!(s, "Non-robust std err: {:.4}", fit.se_ols);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::add_months;
    use approx::assert_abs_diff_eq;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
    }

    /// Treated city jumps by `jump` from month index `at`; controls follow
    /// their own level plus a common seasonal pattern.
    fn synthetic_panel(jump: f64, at: i32, noise: &[f64]) -> Vec<MonthlyPoint> {
        let mut out = Vec::new();
        for (c, (city, level)) in [("T", 50.0), ("C1", 30.0), ("C2", 40.0)]
            .into_iter()
            .enumerate()
        {
            for m in 0..12 {
                let season = [0.0, 2.0, -1.0, 4.0][m as usize % 4];
                let bump = if city == "T" && m >= at { jump } else { 0.0 };
                let e = noise.get(c * 12 + m as usize).copied().unwrap_or(0.0);
                out.push(MonthlyPoint::new(
                    add_months(start(), m),
                    city,
                    Some(level + season + bump + e),
                ));
            }
        }
        out
    }

    #[test]
    fn test_prepare_flags() {
        let panel = synthetic_panel(0.0, 6, &[]);
        let prepared = prepare(&panel, "pm25", "T", add_months(start(), 6));

        for r in &prepared.rows {
            assert_eq!(r.treated, u8::from(r.city == "T"));
            assert_eq!(r.post, u8::from(r.month_start >= add_months(start(), 6)));
            assert_eq!(r.interaction, r.treated * r.post);
        }
        assert_eq!(
            prepared.rows.iter().filter(|r| r.interaction == 1).count(),
            6
        );
    }

    #[test]
    fn test_exact_jump_recovered() {
        let panel = synthetic_panel(10.0, 6, &[]);
        let res = estimate(&prepare(&panel, "pm25", "T", add_months(start(), 6)));

        assert!(res.is_estimable());
        assert_abs_diff_eq!(res.effect, 10.0, epsilon = 1e-8);
        assert!(res.standard_error < 1e-6);
        assert_eq!(res.n_obs, 36);
        assert!(res.summary.contains("treated×post"));
    }

    #[test]
    fn test_noisy_jump_has_positive_se() {
        let noise: Vec<f64> = (0..36)
            .map(|i| ((i * 7919) % 13) as f64 / 13.0 - 0.5)
            .collect();
        let res = estimate(&prepare(
            &synthetic_panel(5.0, 6, &noise),
            "pm25",
            "T",
            add_months(start(), 6),
        ));
        assert!((res.effect - 5.0).abs() < 1.0, "effect={}", res.effect);
        assert!(res.standard_error > 0.0);
        assert!(res.p_value < 0.05);
    }

    #[test]
    fn test_summary_reports_interval() {
        let noise: Vec<f64> = (0..36)
            .map(|i| ((i * 7919) % 13) as f64 / 13.0 - 0.5)
            .collect();
        let res = estimate(&prepare(
            &synthetic_panel(5.0, 6, &noise),
            "pm25",
            "T",
            add_months(start(), 6),
        ));
        let (lo, hi) = res.interval(Z_95);
        assert!(lo < res.effect && res.effect < hi);
        assert_abs_diff_eq!(hi - res.effect, Z_95 * res.standard_error, epsilon = 1e-12);
        assert!(res.summary.contains(&format!("{lo:>12.4}{hi:>12.4}")));
    }

    #[test]
    fn test_large_scale_unbalanced_panel_is_estimable() {
        let start_2y = start();
        let mut panel = Vec::new();
        for (city, level) in [("T", 1.2e6), ("C1", 1.0e6), ("C2", 0.9e6)] {
            for m in 0..24 {
                if city == "C2" && m == 5 {
                    continue;
                }
                let season = [0.0, 900.0, -400.0, 1500.0][m as usize % 4];
                let bump = if city == "T" && m >= 12 { 2500.0 } else { 0.0 };
                panel.push(MonthlyPoint::new(
                    add_months(start_2y, m),
                    city,
                    Some(level + season + bump),
                ));
            }
        }
        let res = estimate(&prepare(&panel, "pm25", "T", add_months(start_2y, 12)));
        assert!(res.is_estimable(), "{}", res.summary);
        assert_eq!(res.n_obs, 71);
        assert_abs_diff_eq!(res.effect, 2500.0, epsilon = 1e-3);
    }

    #[test]
    fn test_missing_outcomes_dropped() {
        let mut panel = synthetic_panel(10.0, 6, &[]);
        panel[3].value = None;
        panel[20].value = Some(f64::NAN);
        let res = estimate(&prepare(&panel, "pm25", "T", add_months(start(), 6)));
        assert_eq!(res.n_obs, 34);
        assert_abs_diff_eq!(res.effect, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_absent_treated_city_is_nan() {
        let panel = synthetic_panel(10.0, 6, &[]);
        let prepared = prepare(&panel, "pm25", "Nowhere", add_months(start(), 6));
        assert!(prepared.rows.iter().all(|r| r.interaction == 0));

        let res = estimate(&prepared);
        assert!(res.effect.is_nan());
        assert!(res.standard_error.is_nan());
        assert!(res.p_value.is_nan());
        assert!(!res.is_estimable());
    }

    #[test]
    fn test_only_treated_city_is_collinear() {
        let panel: Vec<_> = synthetic_panel(10.0, 6, &[])
            .into_iter()
            .filter(|p| p.city == "T")
            .collect();
        let res = estimate(&prepare(&panel, "pm25", "T", add_months(start(), 6)));
        assert!(res.effect.is_nan());
    }

    #[test]
    fn test_empty_panel_is_nan() {
        let res = estimate(&prepare(&[], "pm25", "T", start()));
        assert!(res.effect.is_nan());
        assert_eq!(res.n_obs, 0);
    }
}
