//! Lawson-Hanson active-set solver for nonnegative least squares.
//!
//! The solver works on premultiplied normal equations `AᵀA x = Aᵀb`, which
//! is how callers accumulate very tall systems without storing `A`.
//! Equality constraints are supported through an augmented KKT system in
//! which the trailing unknowns are Lagrange multipliers: they are always
//! part of the passive set and are never sign constrained.

use thiserror::Error;

use crate::dense;
use crate::normal_equations::NormalEquations;

/// Errors raised by the nonnegative least squares solver.
#[derive(Debug, Error, PartialEq)]
pub enum NnlsError {
    /// The matrix and right hand side do not agree in size.
    #[error("matrix of {matrix} entries does not match a right hand side of length {rhs}")]
    DimensionMismatch {
        /// Number of entries in the matrix.
        matrix: usize,
        /// Length of the right hand side.
        rhs: usize,
    },

    /// There are more equality rows than unknowns.
    #[error("{equalities} equality constraints for {unknowns} unknowns")]
    TooManyConstraints {
        /// Number of equality constraints.
        equalities: usize,
        /// Number of constrained unknowns.
        unknowns: usize,
    },
}

/// Output of a nonnegative least squares solve.
#[derive(Debug, Clone, PartialEq)]
pub struct NnlsSolution {
    /// The nonnegative unknowns, without Lagrange multipliers.
    pub x: Vec<f64>,
    /// Number of passive-set insertions performed.
    pub iterations: usize,
    /// `true` when a singular subsystem forced the last insertion to be undone.
    pub rolled_back: bool,
}

impl NnlsSolution {
    /// `true` when every unknown is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.x.iter().all(|&v| v == 0.0)
    }
}

/// Lawson-Hanson nonnegative least squares configuration.
#[derive(Debug, Clone)]
pub struct NonNegativeLeastSquares {
    /// Multiplier applied to `max |Aᵀb|` to obtain the dual feasibility tolerance.
    pub tolerance_scale: f64,
    /// Bound on passive-set insertions, as a multiple of the number of unknowns.
    pub max_iterations_factor: usize,
}

impl Default for NonNegativeLeastSquares {
    fn default() -> Self {
        Self {
            tolerance_scale: 1e-12,
            max_iterations_factor: 3,
        }
    }
}

impl NonNegativeLeastSquares {
    /// Values at or below this are treated as leaving the passive set.
    const ZERO_THRESHOLD: f64 = 0.0;

    /// Solve `min ||Ax - b||²` subject to `x >= 0`.
    ///
    /// # Arguments
    ///
    /// * `equations` - The accumulated normal equations.
    ///
    /// # Returns
    ///
    /// The nonnegative solution.
    ///
    /// # Example
    ///
    /// ```
    /// use specfit_algebra::{NonNegativeLeastSquares, NormalEquations};
    ///
    /// let mut eq = NormalEquations::new(2);
    /// eq.add_row(&[1.0, 0.0], -1.0, 1.0);
    /// eq.add_row(&[0.0, 1.0], 2.0, 1.0);
    ///
    /// let sol = NonNegativeLeastSquares::default().solve(&eq).unwrap();
    /// assert_eq!(sol.x, vec![0.0, 2.0]);
    /// ```
    pub fn solve(&self, equations: &NormalEquations) -> Result<NnlsSolution, NnlsError> {
        self.solve_premultiplied(equations.ata(), equations.atb(), 0, &[])
    }

    /// Solve `min ||Ax - b||²` subject to `x >= 0` and `Σ x = 1`.
    pub fn solve_sum_to_one(&self, equations: &NormalEquations) -> Result<NnlsSolution, NnlsError> {
        self.solve_premultiplied(equations.ata(), equations.atb(), 1, &[1.0])
    }

    /// Solve premultiplied normal equations with optional equality rows.
    ///
    /// Each equality constraint `k` is `Σ x = targets[k]` over all unknowns;
    /// `equalities` must equal `targets.len()`.
    pub fn solve_premultiplied(
        &self,
        ata: &[f64],
        atb: &[f64],
        equalities: usize,
        targets: &[f64],
    ) -> Result<NnlsSolution, NnlsError> {
        let n = atb.len();
        if ata.len() != n * n {
            return Err(NnlsError::DimensionMismatch {
                matrix: ata.len(),
                rhs: n,
            });
        }
        if equalities != targets.len() || (equalities > 0 && equalities > n) {
            return Err(NnlsError::TooManyConstraints {
                equalities,
                unknowns: n,
            });
        }

        // augmented KKT system [[AᵀA, Cᵀ], [C, 0]] with C all ones
        let dim = n + equalities;
        let mut m = vec![0.0; dim * dim];
        for i in 0..n {
            m[i * dim..i * dim + n].copy_from_slice(&ata[i * n..(i + 1) * n]);
            for k in 0..equalities {
                m[i * dim + n + k] = 1.0;
                m[(n + k) * dim + i] = 1.0;
            }
        }
        let mut rhs = atb.to_vec();
        rhs.extend_from_slice(targets);

        let tolerance = self.tolerance_scale * atb.iter().fold(0.0f64, |a, v| a.max(v.abs()));

        let (mut x, iterations, rolled_back) = self.active_set(&m, &rhs, n, dim, tolerance);
        x.truncate(n);

        Ok(NnlsSolution {
            x,
            iterations,
            rolled_back,
        })
    }

    fn active_set(
        &self,
        m: &[f64],
        rhs: &[f64],
        constrained: usize,
        dim: usize,
        tolerance: f64,
    ) -> (Vec<f64>, usize, bool) {
        let has_equalities = dim > constrained;
        let mut x = vec![0.0; dim];
        let mut passive = vec![false; dim];
        passive[constrained..].iter_mut().for_each(|p| *p = true);
        let mut passive_count = 0;

        let max_iterations = self.max_iterations_factor * dim.max(1);
        let mut iterations = 0;

        while passive_count < constrained && iterations < max_iterations {
            // dual vector w = rhs - M x over the active (zero) set
            let mut best: Option<(usize, f64)> = None;
            for i in (0..constrained).filter(|&i| !passive[i]) {
                let row = &m[i * dim..(i + 1) * dim];
                let w = rhs[i] - row.iter().zip(&x).map(|(a, b)| a * b).sum::<f64>();
                if best.map_or(true, |(_, bw)| w > bw) {
                    best = Some((i, w));
                }
            }

            let Some((entering, max_w)) = best else {
                break;
            };
            let must_enter = has_equalities && passive_count == 0;
            if max_w <= tolerance && !must_enter {
                break;
            }

            passive[entering] = true;
            passive_count += 1;
            iterations += 1;

            loop {
                let idx: Vec<usize> = (0..dim).filter(|&i| passive[i]).collect();
                let Some(s) = dense::solve_subsystem(m, dim, rhs, &idx) else {
                    log::debug!("nnls: singular subsystem, rolling back index {entering}");
                    passive[entering] = false;
                    x[entering] = 0.0;
                    return (x, iterations, true);
                };

                let feasible = idx
                    .iter()
                    .zip(&s)
                    .all(|(&i, &si)| i >= constrained || si > Self::ZERO_THRESHOLD);
                if feasible {
                    for (&i, &si) in idx.iter().zip(&s) {
                        x[i] = si;
                    }
                    break;
                }

                // step back towards the previous feasible point
                let (blocking, alpha) = idx
                    .iter()
                    .zip(&s)
                    .filter(|(&i, &si)| i < constrained && si <= Self::ZERO_THRESHOLD)
                    .map(|(&i, &si)| {
                        let denom = x[i] - si;
                        (i, if denom > 0.0 { x[i] / denom } else { 0.0 })
                    })
                    .fold((usize::MAX, 1.0f64), |best, cur| {
                        if cur.1 <= best.1 {
                            cur
                        } else {
                            best
                        }
                    });

                for (&i, &si) in idx.iter().zip(&s) {
                    x[i] += alpha * (si - x[i]);
                }
                if blocking < constrained {
                    x[blocking] = 0.0;
                }
                for &i in idx.iter().filter(|&&i| i < constrained) {
                    if x[i] <= Self::ZERO_THRESHOLD {
                        x[i] = 0.0;
                        passive[i] = false;
                        passive_count -= 1;
                    }
                }
                if passive_count == 0 && !has_equalities {
                    break;
                }
            }
        }

        (x, iterations, false)
    }
}
