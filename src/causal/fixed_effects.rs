//! Absorbing categorical fixed effects by alternating projections.
//!
//! Each fixed-effect dimension maps every observation to a 0-based level.
//! Partialling out repeatedly subtracts level means dimension by dimension
//! until every level mean is below tolerance, which leaves the residual of a
//! regression on the full set of dummies without ever building them.
//!
//! The tolerance is relative to the largest absolute input value, so outcomes
//! in the millions converge as readily as outcomes near one.

use std::collections::HashMap;
use tracing::warn;

use crate::error::{ModelError, ModelResult};

const DEFAULT_TOL: f64 = 1e-12;
const DEFAULT_MAX_ITER: usize = 10_000;

#[derive(Debug, Clone)]
pub struct FixedEffectsSolver {
    n: usize,
    /// group_of[d][i] = level of observation i in dimension d.
    group_of: Vec<Vec<usize>>,
    /// group_indices[d][g] = observations at level g in dimension d.
    group_indices: Vec<Vec<Vec<usize>>>,
    tol: f64,
    max_iter: usize,
}

impl FixedEffectsSolver {
    pub fn new(groups: Vec<Vec<usize>>) -> ModelResult<Self> {
        let Some(first) = groups.first() else {
            return Err(ModelError::InvalidInput(
                "at least one fixed-effect dimension required".into(),
            ));
        };
        let n = first.len();
        if n == 0 {
            return Err(ModelError::InsufficientData { needed: 1, got: 0 });
        }
        for (d, g) in groups.iter().enumerate() {
            if g.len() != n {
                return Err(ModelError::InvalidInput(format!(
                    "fixed-effect dimension {d} has length {}, expected {n}",
                    g.len()
                )));
            }
        }

        let group_indices = groups
            .iter()
            .map(|g| {
                let levels = g.iter().copied().max().map_or(0, |m| m + 1);
                let mut idx: Vec<Vec<usize>> = vec![Vec::new(); levels];
                for (i, &level) in g.iter().enumerate() {
                    idx[level].push(i);
                }
                idx
            })
            .collect();

        Ok(Self {
            n,
            group_of: groups,
            group_indices,
            tol: DEFAULT_TOL,
            max_iter: DEFAULT_MAX_ITER,
        })
    }

    /// Number of levels per dimension.
    pub fn levels(&self) -> Vec<usize> {
        self.group_indices.iter().map(Vec::len).collect()
    }

    /// Removes every fixed effect from `v`.
    ///
    /// Sweeps stop once every level mean is below `tol · max(1, ‖v‖∞)`. If that
    /// never happens within `max_iter` sweeps the last iterate is returned.
    pub fn partial_out(&self, v: &[f64]) -> ModelResult<Vec<f64>> {
        if v.len() != self.n {
            return Err(ModelError::InvalidInput(format!(
                "vector length {} != n {}",
                v.len(),
                self.n
            )));
        }

        let mut resid = v.to_vec();
        if self.group_of.len() == 1 {
            self.demean_dim(&mut resid, 0);
            return Ok(resid);
        }

        let scale = v.iter().fold(1.0_f64, |m, x| m.max(x.abs()));
        let tol = self.tol * scale;
        let mut max_mean = f64::INFINITY;
        for _ in 0..self.max_iter {
            for d in 0..self.group_of.len() {
                self.demean_dim(&mut resid, d);
            }
            max_mean = self.max_group_mean_abs(&resid);
            if max_mean < tol {
                return Ok(resid);
            }
        }

        if !max_mean.is_finite() {
            return Err(ModelError::NonFinite(
                "fixed-effect projection produced non-finite values".into(),
            ));
        }
        warn!(
            sweeps = self.max_iter,
            max_group_mean = max_mean,
            tol,
            "fixed-effect projection stopped before tolerance"
        );
        Ok(resid)
    }

    /// Parameters absorbed by the fixed effects, intercept included.
    ///
    /// One dimension: its level count. Two dimensions: levels of both minus the
    /// number of connected components of the bipartite level graph. Beyond two
    /// the same count is a conservative upper bound.
    pub fn degrees_of_freedom_absorbed(&self) -> usize {
        let levels = self.levels();
        match levels.len() {
            1 => levels[0],
            _ => {
                let (a, b) = (levels[0], levels[1]);
                let mut uf = UnionFind::new(a + b);
                for i in 0..self.n {
                    uf.union(self.group_of[0][i], a + self.group_of[1][i]);
                }
                let components = uf.components();
                let two_way = a + b - components;
                two_way + levels[2..].iter().map(|l| l.saturating_sub(1)).sum::<usize>()
            }
        }
    }

    fn demean_dim(&self, v: &mut [f64], d: usize) {
        for idx in &self.group_indices[d] {
            if idx.is_empty() {
                continue;
            }
            let m = idx.iter().map(|&i| v[i]).sum::<f64>() / idx.len() as f64;
            for &i in idx {
                v[i] -= m;
            }
        }
    }

    fn max_group_mean_abs(&self, v: &[f64]) -> f64 {
        self.group_indices
            .iter()
            .flat_map(|dim| dim.iter())
            .filter(|idx| !idx.is_empty())
            .map(|idx| (idx.iter().map(|&i| v[i]).sum::<f64>() / idx.len() as f64).abs())
            .fold(0.0, f64::max)
    }
}

/// Maps labels to dense 0-based ids in order of first appearance.
pub fn dense_ids<K: std::hash::Hash + Eq + Clone>(labels: &[K]) -> Vec<usize> {
    let mut map: HashMap<K, usize> = HashMap::new();
    labels
        .iter()
        .map(|k| {
            let next = map.len();
            *map.entry(k.clone()).or_insert(next)
        })
        .collect()
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }

    fn components(&mut self) -> usize {
        (0..self.parent.len()).filter(|&x| self.find(x) == x).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_way_demeaning_is_exact() {
        let solver = FixedEffectsSolver::new(vec![vec![0, 0, 1, 1]]).unwrap();
        let out = solver.partial_out(&[1.0, 3.0, 10.0, 20.0]).unwrap();
        assert_eq!(out, vec![-1.0, 1.0, -5.0, 5.0]);
        assert_eq!(solver.degrees_of_freedom_absorbed(), 2);
    }

    #[test]
    fn test_two_way_removes_additive_effects() {
        // y = city effect + month effect, nothing else
        let city = vec![0, 0, 0, 1, 1, 1];
        let month = vec![0, 1, 2, 0, 1, 2];
        let y: Vec<f64> = city
            .iter()
            .zip(&month)
            .map(|(&c, &m)| 5.0 * c as f64 + [1.0, -2.0, 7.0][m])
            .collect();

        let solver = FixedEffectsSolver::new(vec![city, month]).unwrap();
        let out = solver.partial_out(&y).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-9), "{out:?}");
        // 2 cities + 3 months - 1 connected component
        assert_eq!(solver.degrees_of_freedom_absorbed(), 4);
    }

    #[test]
    fn test_unbalanced_panel_converges() {
        let city = vec![0, 0, 0, 1, 1];
        let month = vec![0, 1, 2, 1, 2];
        let y: Vec<f64> = city
            .iter()
            .zip(&month)
            .map(|(&c, &m)| 3.0 * c as f64 + m as f64 * m as f64)
            .collect();
        let solver = FixedEffectsSolver::new(vec![city, month]).unwrap();
        let out = solver.partial_out(&y).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-8), "{out:?}");
    }

    #[test]
    fn test_large_scale_unbalanced_panel_converges() {
        // 3 cities x 24 months around 1e6, one control month missing
        let mut city = Vec::new();
        let mut month = Vec::new();
        let mut y = Vec::new();
        for c in 0..3 {
            for m in 0..24 {
                if c == 2 && m == 5 {
                    continue;
                }
                city.push(c);
                month.push(m);
                y.push(1e6 + 250.0 * c as f64 + 17.0 * (m % 12) as f64);
            }
        }
        let solver = FixedEffectsSolver::new(vec![city, month]).unwrap();
        let out = solver.partial_out(&y).unwrap();
        assert_eq!(out.len(), 71);
        assert!(out.iter().all(|v| v.abs() < 1e-4), "{out:?}");
    }

    #[test]
    fn test_dense_ids_first_appearance() {
        assert_eq!(dense_ids(&["b", "a", "b", "c"]), vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_validation() {
        assert!(FixedEffectsSolver::new(vec![]).is_err());
        assert!(FixedEffectsSolver::new(vec![vec![]]).is_err());
        assert!(FixedEffectsSolver::new(vec![vec![0, 1], vec![0]]).is_err());
    }
}
