//! Multiplicative seasonal ARIMA `(p,d,q) × (P,D,Q)_s` without constant.
//!
//! The series is differenced `d` times at lag 1 and `D` times at lag `s`; the
//! remaining ARMA part
//!
//! `φ(B) Φ(B^s) w_t = θ(B) Θ(B^s) e_t`
//!
//! is fitted by conditional sum of squares (pre-sample errors set to zero)
//! with Nelder–Mead over `tanh`-bounded coefficients, so every coefficient
//! stays inside (-1, 1). Forecasts run the fully expanded difference equation
//! forward; their variance comes from the ψ-weights of the expanded model.

use argmin::core::{CostFunction, Executor, State};
use argmin::solver::neldermead::NelderMead;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{ModelError, ModelResult};

const MAX_ITERS: u64 = 2_000;
const SD_TOLERANCE: f64 = 1e-10;
const INITIAL_STEP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SarimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub period: usize,
}

impl SarimaOrder {
    /// `(1,1,1) × (0,1,1)_12`, the monthly model used by the forecaster.
    pub const MONTHLY: SarimaOrder = SarimaOrder {
        p: 1,
        d: 1,
        q: 1,
        seasonal_p: 0,
        seasonal_d: 1,
        seasonal_q: 1,
        period: 12,
    };

    /// `(1,1,1)` with no seasonal part.
    pub const NON_SEASONAL: SarimaOrder = SarimaOrder {
        p: 1,
        d: 1,
        q: 1,
        seasonal_p: 0,
        seasonal_d: 0,
        seasonal_q: 0,
        period: 0,
    };

    /// `(0,1,0)`: a random walk.
    pub const RANDOM_WALK: SarimaOrder = SarimaOrder {
        p: 0,
        d: 1,
        q: 0,
        seasonal_p: 0,
        seasonal_d: 0,
        seasonal_q: 0,
        period: 0,
    };

    pub fn n_params(&self) -> usize {
        self.p + self.q + self.seasonal_p + self.seasonal_q
    }

    /// Observations consumed by differencing.
    pub fn lost_to_differencing(&self) -> usize {
        self.d + self.seasonal_d * self.period
    }

    /// Smallest series length for which [`SarimaModel::fit`] is attempted.
    ///
    /// Parameter-free orders only need one observation; otherwise at least two
    /// residuals per coefficient must survive differencing and AR lags.
    pub fn min_observations(&self) -> usize {
        if self.n_params() == 0 {
            return self.lost_to_differencing().max(1);
        }
        let ar_lags = self.p + self.seasonal_p * self.period;
        self.lost_to_differencing() + ar_lags + self.n_params() + 2
    }
}

impl std::fmt::Display for SarimaOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.p, self.d, self.q)?;
        if self.period > 0 {
            write!(
                f,
                "x({},{},{},{})",
                self.seasonal_p, self.seasonal_d, self.seasonal_q, self.period
            )?;
        }
        Ok(())
    }
}

/// A fitted model together with the history needed to forecast from it.
#[derive(Debug, Clone)]
pub struct SarimaModel {
    pub order: SarimaOrder,
    pub ar: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub seasonal_ma: Vec<f64>,
    /// Innovation variance (CSS / residual count).
    pub sigma2: f64,
    /// Residual count entering the sum of squares.
    pub n_eff: usize,
    history: Vec<f64>,
    /// Innovations aligned with `history`; zero where not estimable.
    residuals: Vec<f64>,
}

/// Point forecasts and their error variances, one entry per step ahead.
#[derive(Debug, Clone, PartialEq)]
pub struct SarimaForecast {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

/// Coefficient block of `(1 - c1 B^step - c2 B^2step ...)` or, with
/// `sign = +1`, `(1 + c1 B^step + ...)`.
fn lag_poly(coeffs: &[f64], step: usize, sign: f64) -> Vec<f64> {
    let mut out = vec![0.0; coeffs.len() * step + 1];
    out[0] = 1.0;
    for (i, c) in coeffs.iter().enumerate() {
        out[(i + 1) * step] = sign * c;
    }
    out
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// `(1 - B)^d (1 - B^s)^D`.
fn difference_poly(order: &SarimaOrder) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..order.d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    for _ in 0..order.seasonal_d {
        poly = poly_mul(&poly, &lag_poly(&[1.0], order.period, -1.0));
    }
    poly
}

/// Applies a lag polynomial to `y`, dropping the first `deg` outputs.
fn apply_poly(poly: &[f64], y: &[f64]) -> Vec<f64> {
    let deg = poly.len() - 1;
    (deg..y.len())
        .map(|t| poly.iter().enumerate().map(|(k, c)| c * y[t - k]).sum())
        .collect()
}

/// Splits a flat coefficient vector into AR and MA operator polynomials.
fn arma_polys(order: &SarimaOrder, coeffs: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let (ar, rest) = coeffs.split_at(order.p);
    let (sar, rest) = rest.split_at(order.seasonal_p);
    let (ma, sma) = rest.split_at(order.q);
    let a = poly_mul(
        &lag_poly(ar, 1, -1.0),
        &lag_poly(sar, order.period.max(1), -1.0),
    );
    let m = poly_mul(
        &lag_poly(ma, 1, 1.0),
        &lag_poly(sma, order.period.max(1), 1.0),
    );
    (a, m)
}

/// Conditional sum of squares of the ARMA innovations of `w`.
fn css(w: &[f64], a: &[f64], m: &[f64]) -> (f64, Vec<f64>) {
    let start = a.len() - 1;
    let mut e = vec![0.0; w.len()];
    let mut ss = 0.0;
    for t in start..w.len() {
        let mut v: f64 = a.iter().enumerate().map(|(k, ak)| ak * w[t - k]).sum();
        for (k, mk) in m.iter().enumerate().skip(1).take(t) {
            v -= mk * e[t - k];
        }
        e[t] = v;
        ss += v * v;
    }
    (ss, e)
}

struct CssProblem<'a> {
    w: &'a [f64],
    order: &'a SarimaOrder,
}

impl CostFunction for CssProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let coeffs: Vec<f64> = u.iter().map(|x| x.tanh()).collect();
        let (a, m) = arma_polys(self.order, &coeffs);
        let (ss, _) = css(self.w, &a, &m);
        Ok(if ss.is_finite() { ss } else { f64::MAX })
    }
}

impl SarimaModel {
    /// Fits `order` to a gap-free series.
    pub fn fit(y: &[f64], order: SarimaOrder) -> ModelResult<Self> {
        if y.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("series contains NaN or infinity".into()));
        }
        let needed = order.min_observations();
        if y.len() < needed {
            return Err(ModelError::InsufficientData {
                needed,
                got: y.len(),
            });
        }

        let w = apply_poly(&difference_poly(&order), y);
        let k = order.n_params();
        let coeffs = if k == 0 {
            Vec::new()
        } else {
            let problem = CssProblem { w: &w, order: &order };
            let simplex: Vec<Vec<f64>> = std::iter::once(vec![0.0; k])
                .chain((0..k).map(|i| {
                    let mut v = vec![0.0; k];
                    v[i] = INITIAL_STEP;
                    v
                }))
                .collect();
            let solver = NelderMead::new(simplex)
                .with_sd_tolerance(SD_TOLERANCE)
                .map_err(|e| ModelError::Optimizer(e.to_string()))?;
            let res = Executor::new(problem, solver)
                .configure(|state| state.max_iters(MAX_ITERS))
                .run()
                .map_err(|e| ModelError::Optimizer(e.to_string()))?;
            let best = res
                .state()
                .get_best_param()
                .cloned()
                .ok_or_else(|| ModelError::Optimizer("no best parameter".into()))?;
            best.iter().map(|x| x.tanh()).collect()
        };

        let (a, m) = arma_polys(&order, &coeffs);
        let (ss, e_w) = css(&w, &a, &m);
        let n_eff = w.len() - (a.len() - 1);
        let sigma2 = if n_eff > 0 { ss / n_eff as f64 } else { 0.0 };
        if !sigma2.is_finite() {
            return Err(ModelError::NonFinite("innovation variance".into()));
        }

        let lost = order.lost_to_differencing();
        let mut residuals = vec![0.0; y.len()];
        residuals[lost..].copy_from_slice(&e_w);

        let (ar, rest) = coeffs.split_at(order.p);
        let (seasonal_ar, rest) = rest.split_at(order.seasonal_p);
        let (ma, seasonal_ma) = rest.split_at(order.q);

        Ok(Self {
            order,
            ar: ar.to_vec(),
            seasonal_ar: seasonal_ar.to_vec(),
            ma: ma.to_vec(),
            seasonal_ma: seasonal_ma.to_vec(),
            sigma2,
            n_eff,
            history: y.to_vec(),
            residuals,
        })
    }

    /// Expanded AR polynomial (differencing included) and MA polynomial.
    fn expanded(&self) -> (Vec<f64>, Vec<f64>) {
        let coeffs: Vec<f64> = self
            .ar
            .iter()
            .chain(&self.seasonal_ar)
            .chain(&self.ma)
            .chain(&self.seasonal_ma)
            .copied()
            .collect();
        let (a, m) = arma_polys(&self.order, &coeffs);
        (poly_mul(&a, &difference_poly(&self.order)), m)
    }

    /// Projects `horizon` steps past the end of the fitted series.
    pub fn forecast(&self, horizon: usize) -> SarimaForecast {
        let (a, m) = self.expanded();
        let n = self.history.len();

        let mut y = self.history.clone();
        let mut e = self.residuals.clone();
        let mut mean = Vec::with_capacity(horizon);
        for t in n..n + horizon {
            let mut v = 0.0;
            for (k, ak) in a.iter().enumerate().skip(1) {
                if let Some(prev) = t.checked_sub(k).map(|i| y[i]) {
                    v -= ak * prev;
                }
            }
            for (k, mk) in m.iter().enumerate().skip(1) {
                if let Some(prev) = t.checked_sub(k).map(|i| e[i]) {
                    v += mk * prev;
                }
            }
            y.push(v);
            e.push(0.0);
            mean.push(v);
        }

        // psi_j = m_j - sum_{k=1..j} a_k psi_{j-k}
        let mut psi = Vec::with_capacity(horizon);
        for j in 0..horizon {
            let mut v = if j == 0 { 1.0 } else { m.get(j).copied().unwrap_or(0.0) };
            for k in 1..=j.min(a.len() - 1) {
                v -= a[k] * psi[j - k];
            }
            psi.push(v);
        }
        let mut acc = 0.0;
        let variance = psi
            .iter()
            .map(|p| {
                acc += p * p;
                self.sigma2 * acc
            })
            .collect();

        SarimaForecast { mean, variance }
    }

    /// Point forecasts with two-sided `1 - alpha` normal intervals:
    /// `(mean, lower, upper)` per step.
    pub fn forecast_interval(
        &self,
        horizon: usize,
        alpha: f64,
    ) -> ModelResult<Vec<(f64, f64, f64)>> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ModelError::InvalidInput(format!(
                "alpha must be in (0, 1), got {alpha}"
            )));
        }
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| ModelError::InvalidInput(format!("standard normal: {e}")))?;
        let z = normal.inverse_cdf(1.0 - alpha / 2.0);

        let fc = self.forecast(horizon);
        fc.mean
            .iter()
            .zip(&fc.variance)
            .map(|(&mu, &var)| {
                if !mu.is_finite() || !var.is_finite() {
                    return Err(ModelError::NonFinite("forecast mean or variance".into()));
                }
                let half = z * var.max(0.0).sqrt();
                Ok((mu, mu - half, mu + half))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_difference_poly_monthly() {
        let p = difference_poly(&SarimaOrder::MONTHLY);
        // (1 - B)(1 - B^12) = 1 - B - B^12 + B^13
        assert_eq!(p.len(), 14);
        assert_eq!(p[0], 1.0);
        assert_eq!(p[1], -1.0);
        assert_eq!(p[12], -1.0);
        assert_eq!(p[13], 1.0);
        assert!(p[2..12].iter().all(|c| *c == 0.0));
    }

    #[test]
    fn test_min_observations() {
        assert_eq!(SarimaOrder::RANDOM_WALK.min_observations(), 1);
        assert_eq!(SarimaOrder::NON_SEASONAL.min_observations(), 6);
        assert_eq!(SarimaOrder::MONTHLY.min_observations(), 19);
    }

    #[test]
    fn test_constant_series_forecasts_constant() {
        let y = vec![50.0; 36];
        let model = SarimaModel::fit(&y, SarimaOrder::MONTHLY).unwrap();
        let iv = model.forecast_interval(6, 0.05).unwrap();
        assert_eq!(iv.len(), 6);
        for (mu, lo, hi) in iv {
            assert_abs_diff_eq!(mu, 50.0, epsilon = 1e-9);
            assert!(lo <= mu && mu <= hi);
        }
    }

    #[test]
    fn test_seasonal_pattern_repeats() {
        let season = [3.0, 1.0, -2.0, 0.5, 4.0, -1.0, 2.0, 0.0, -3.0, 1.5, -0.5, 2.5];
        let y: Vec<f64> = (0..48).map(|t| 40.0 + season[t % 12]).collect();
        let model = SarimaModel::fit(&y, SarimaOrder::MONTHLY).unwrap();
        let fc = model.forecast(12);
        for (h, v) in fc.mean.iter().enumerate() {
            assert_abs_diff_eq!(*v, 40.0 + season[(48 + h) % 12], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_random_walk_single_point() {
        let model = SarimaModel::fit(&[7.0], SarimaOrder::RANDOM_WALK).unwrap();
        let iv = model.forecast_interval(3, 0.05).unwrap();
        assert_eq!(iv, vec![(7.0, 7.0, 7.0); 3]);
    }

    #[test]
    fn test_random_walk_variance_grows() {
        let y = [1.0, 2.0, 1.0, 3.0, 2.0, 4.0];
        let model = SarimaModel::fit(&y, SarimaOrder::RANDOM_WALK).unwrap();
        let fc = model.forecast(4);
        assert!(fc.mean.iter().all(|v| *v == 4.0));
        for w in fc.variance.windows(2) {
            assert!(w[1] > w[0]);
        }
        assert_abs_diff_eq!(fc.variance[1], 2.0 * fc.variance[0], epsilon = 1e-12);
    }

    #[test]
    fn test_ar1_coefficient_recovered() {
        use rand::{SeedableRng, rngs::StdRng};
        use rand_distr::{Distribution, Normal as Gaussian};

        // AR(1) in first differences
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Gaussian::new(0.0, 1.0).unwrap();
        let mut diffs = vec![0.0];
        for i in 1..300 {
            diffs.push(0.6 * diffs[i - 1] + noise.sample(&mut rng));
        }
        let mut y = vec![100.0];
        for d in &diffs[1..] {
            y.push(y.last().unwrap() + d);
        }
        let order = SarimaOrder {
            q: 0,
            ..SarimaOrder::NON_SEASONAL
        };
        let model = SarimaModel::fit(&y, order).unwrap();
        assert!((model.ar[0] - 0.6).abs() < 0.15, "phi={}", model.ar[0]);
        assert!(model.sigma2 > 0.0);
    }

    #[test]
    fn test_rejects_short_and_non_finite() {
        assert!(matches!(
            SarimaModel::fit(&[1.0; 10], SarimaOrder::MONTHLY),
            Err(ModelError::InsufficientData { needed: 19, got: 10 })
        ));
        assert!(matches!(
            SarimaModel::fit(&[1.0, f64::NAN, 2.0], SarimaOrder::RANDOM_WALK),
            Err(ModelError::NonFinite(_))
        ));
    }

    #[test]
    fn test_interval_alpha_validated() {
        let model = SarimaModel::fit(&[1.0, 2.0], SarimaOrder::RANDOM_WALK).unwrap();
        assert!(model.forecast_interval(2, 0.0).is_err());
        assert!(model.forecast_interval(2, 1.5).is_err());
    }
}
