//! Levenberg-Marquardt optimizer for small non-linear least squares problems
//!
//! The Levenberg-Marquardt algorithm is a trust-region method that combines
//! the advantages of gradient descent and Gauss-Newton methods. It solves
//! the damped normal equations: (J^T J + λI) δ = -J^T r
//!
//! The Jacobian is estimated with central finite differences, which keeps the
//! problem definition down to a residual function. The damping factor has a
//! hard floor, and the solver gives up after a bounded number of consecutive
//! rejected steps.

use thiserror::Error;

use crate::dense;

/// Errors that can occur during optimization.
#[derive(Debug, Error, PartialEq)]
pub enum OptimizerError {
    /// The problem has no parameters.
    #[error("Problem has no parameters")]
    NoParameters,

    /// The initial parameter vector does not match the problem.
    #[error("Expected {expected} parameters, got {actual}")]
    ParameterMismatch {
        /// Parameters declared by the problem.
        expected: usize,
        /// Parameters passed by the caller.
        actual: usize,
    },

    /// Numerical instability detected
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

/// A residual function to be minimized in the least squares sense.
pub trait LeastSquaresProblem {
    /// Number of free parameters.
    fn num_parameters(&self) -> usize;

    /// Write the residual vector for `params` into `out`.
    ///
    /// The number of residuals must not depend on `params`.
    fn residuals(&self, params: &[f64], out: &mut Vec<f64>);
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerResult {
    /// Parameters after the last accepted step
    pub params: Vec<f64>,
    /// Cost (sum of squared residuals) at the initial parameters
    pub initial_cost: f64,
    /// Final cost (sum of squared residuals)
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Number of accepted steps
    pub accepted_steps: usize,
    /// Damping factor when the optimizer stopped
    pub lambda: f64,
    /// Reason for termination
    pub termination_reason: TerminationReason,
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged: relative cost change below tolerance
    CostConverged,
    /// Converged: gradient norm below tolerance
    GradientConverged,
    /// Maximum iterations reached
    MaxIterations,
    /// Too many consecutive rejected steps
    UnsuccessfulLimit,
    /// Lambda exceeded maximum (likely numerical issues)
    LambdaMaxExceeded,
    /// Optimization stopped early by user callback
    Interrupted,
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter
    pub lambda_init: f64,
    /// Floor for the damping parameter
    pub lambda_min: f64,
    /// Maximum damping parameter
    pub lambda_max: f64,
    /// Factor for lambda adaptation
    pub lambda_factor: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence threshold for the relative cost change of an accepted step
    pub cost_tolerance: f64,
    /// Convergence threshold for gradient norm
    pub gradient_tolerance: f64,
    /// Consecutive rejected steps tolerated before giving up
    pub unsuccessful_iterations_allowed: usize,
    /// Step used for the central finite difference Jacobian
    pub finite_difference_step: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1.0,
            lambda_min: 1e-10,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 50,
            cost_tolerance: 1e-9,
            gradient_tolerance: 1e-12,
            unsuccessful_iterations_allowed: 8,
            finite_difference_step: 1e-6,
        }
    }
}

/// Snapshot of the optimizer state for callbacks.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerState {
    /// Iterations performed so far
    pub iteration: usize,
    /// Cost at the current parameters
    pub cost: f64,
    /// Current damping parameter
    pub lambda: f64,
    /// Consecutive rejected steps
    pub unsuccessful: usize,
    /// Whether the last step was accepted, `None` before the first step
    pub last_step_accepted: Option<bool>,
}

impl LevenbergMarquardt {
    /// Minimum step norm threshold. Steps smaller than this are considered zero.
    const STEP_SIZE_TOLERANCE: f64 = 1e-15;

    /// Minimize the problem starting from `initial`.
    pub fn optimize<P: LeastSquaresProblem>(
        &self,
        problem: &P,
        initial: &[f64],
    ) -> Result<OptimizerResult, OptimizerError> {
        self.optimize_with_callback(problem, initial, |_state| true)
    }

    /// Minimize the problem, calling `callback` after every iteration.
    ///
    /// Returning `false` from the callback stops the optimizer with
    /// [`TerminationReason::Interrupted`].
    pub fn optimize_with_callback<P, F>(
        &self,
        problem: &P,
        initial: &[f64],
        mut callback: F,
    ) -> Result<OptimizerResult, OptimizerError>
    where
        P: LeastSquaresProblem,
        F: FnMut(&OptimizerState) -> bool,
    {
        let n = problem.num_parameters();
        if n == 0 {
            return Err(OptimizerError::NoParameters);
        }
        if initial.len() != n {
            return Err(OptimizerError::ParameterMismatch {
                expected: n,
                actual: initial.len(),
            });
        }

        let mut params = initial.to_vec();
        let mut residuals = Vec::new();
        problem.residuals(&params, &mut residuals);
        let initial_cost = cost(&residuals);
        if !initial_cost.is_finite() {
            return Err(OptimizerError::NumericalInstability(
                "initial cost is not finite".to_string(),
            ));
        }

        let mut current_cost = initial_cost;
        let mut lambda = self.lambda_init.max(self.lambda_min);
        let mut iterations = 0;
        let mut accepted_steps = 0;
        let mut unsuccessful = 0;

        let finish = |params: Vec<f64>,
                      cost: f64,
                      iterations: usize,
                      accepted_steps: usize,
                      lambda: f64,
                      reason: TerminationReason|
         -> Result<OptimizerResult, OptimizerError> {
            Ok(OptimizerResult {
                params,
                initial_cost,
                final_cost: cost,
                iterations,
                accepted_steps,
                lambda,
                termination_reason: reason,
            })
        };

        let init_state = OptimizerState {
            iteration: 0,
            cost: current_cost,
            lambda,
            unsuccessful,
            last_step_accepted: None,
        };
        if !callback(&init_state) {
            return finish(params, current_cost, 0, 0, lambda, TerminationReason::Interrupted);
        }

        let mut trial = vec![0.0; n];
        let mut trial_residuals = Vec::new();

        loop {
            if iterations >= self.max_iterations {
                return finish(
                    params,
                    current_cost,
                    iterations,
                    accepted_steps,
                    lambda,
                    TerminationReason::MaxIterations,
                );
            }

            // Build normal equations: J^T J and J^T r
            let (mut jtj, jtr) = self.normal_equations(problem, &params, &residuals);

            // Check gradient convergence
            let gradient_norm = jtr.iter().map(|g| g * g).sum::<f64>().sqrt();
            if gradient_norm < self.gradient_tolerance {
                return finish(
                    params,
                    current_cost,
                    iterations,
                    accepted_steps,
                    lambda,
                    TerminationReason::GradientConverged,
                );
            }

            // Solve damped system: (J^T J + λI) δ = -J^T r
            for i in 0..n {
                jtj[i * n + i] += lambda;
            }
            let rhs: Vec<f64> = jtr.iter().map(|g| -g).collect();
            let delta = dense::solve(&jtj, n, &rhs);
            iterations += 1;

            let step_accepted = match delta {
                Some(delta) => {
                    let step_norm = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
                    if step_norm < Self::STEP_SIZE_TOLERANCE {
                        return finish(
                            params,
                            current_cost,
                            iterations,
                            accepted_steps,
                            lambda,
                            TerminationReason::CostConverged,
                        );
                    }

                    trial
                        .iter_mut()
                        .zip(params.iter().zip(&delta))
                        .for_each(|(t, (p, d))| *t = p + d);
                    problem.residuals(&trial, &mut trial_residuals);
                    let new_cost = cost(&trial_residuals);

                    if new_cost.is_finite() && new_cost < current_cost {
                        let relative_change = (current_cost - new_cost) / current_cost;
                        std::mem::swap(&mut params, &mut trial);
                        std::mem::swap(&mut residuals, &mut trial_residuals);
                        current_cost = new_cost;

                        // Step improved cost: accept it and decrease lambda
                        lambda = (lambda / self.lambda_factor).max(self.lambda_min);
                        unsuccessful = 0;
                        accepted_steps += 1;

                        if relative_change < self.cost_tolerance {
                            return finish(
                                params,
                                current_cost,
                                iterations,
                                accepted_steps,
                                lambda,
                                TerminationReason::CostConverged,
                            );
                        }
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            if !step_accepted {
                // Step increased cost: keep the previous parameters and increase lambda
                lambda *= self.lambda_factor;
                unsuccessful += 1;

                if unsuccessful > self.unsuccessful_iterations_allowed {
                    return finish(
                        params,
                        current_cost,
                        iterations,
                        accepted_steps,
                        lambda,
                        TerminationReason::UnsuccessfulLimit,
                    );
                }
                if lambda > self.lambda_max {
                    return finish(
                        params,
                        current_cost,
                        iterations,
                        accepted_steps,
                        lambda,
                        TerminationReason::LambdaMaxExceeded,
                    );
                }
            }

            let state = OptimizerState {
                iteration: iterations,
                cost: current_cost,
                lambda,
                unsuccessful,
                last_step_accepted: Some(step_accepted),
            };
            if !callback(&state) {
                return finish(
                    params,
                    current_cost,
                    iterations,
                    accepted_steps,
                    lambda,
                    TerminationReason::Interrupted,
                );
            }
        }
    }

    /// Central finite difference J^T J (row major) and J^T r.
    fn normal_equations<P: LeastSquaresProblem>(
        &self,
        problem: &P,
        params: &[f64],
        residuals: &[f64],
    ) -> (Vec<f64>, Vec<f64>) {
        let n = params.len();
        let m = residuals.len();
        let h = self.finite_difference_step;

        let mut jacobian = vec![0.0; m * n];
        let mut shifted = params.to_vec();
        let mut plus = Vec::with_capacity(m);
        let mut minus = Vec::with_capacity(m);

        for j in 0..n {
            shifted[j] = params[j] + h;
            problem.residuals(&shifted, &mut plus);
            shifted[j] = params[j] - h;
            problem.residuals(&shifted, &mut minus);
            shifted[j] = params[j];

            for i in 0..m {
                jacobian[i * n + j] = (plus[i] - minus[i]) / (2.0 * h);
            }
        }

        let mut jtj = vec![0.0; n * n];
        let mut jtr = vec![0.0; n];
        for (row, r) in jacobian.chunks_exact(n).zip(residuals) {
            for a in 0..n {
                jtr[a] += row[a] * r;
                for b in 0..n {
                    jtj[a * n + b] += row[a] * row[b];
                }
            }
        }

        (jtj, jtr)
    }
}

fn cost(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Quadratic {
        targets: Vec<f64>,
    }

    impl LeastSquaresProblem for Quadratic {
        fn num_parameters(&self) -> usize {
            self.targets.len()
        }

        fn residuals(&self, params: &[f64], out: &mut Vec<f64>) {
            out.clear();
            out.extend(params.iter().zip(&self.targets).map(|(p, t)| p - t));
        }
    }

    /// Residual `1 + |x| + x / 2`: the finite difference slope points to negative
    /// `x`, but every move away from zero increases the cost.
    struct Kink;

    impl LeastSquaresProblem for Kink {
        fn num_parameters(&self) -> usize {
            1
        }

        fn residuals(&self, params: &[f64], out: &mut Vec<f64>) {
            out.clear();
            out.push(1.0 + params[0].abs() + 0.5 * params[0]);
        }
    }

    /// Residual independent of the parameters.
    struct Flat;

    impl LeastSquaresProblem for Flat {
        fn num_parameters(&self) -> usize {
            2
        }

        fn residuals(&self, _params: &[f64], out: &mut Vec<f64>) {
            out.clear();
            out.extend([0.5, -0.25, 1.0]);
        }
    }

    #[test]
    fn test_simple_1d_optimization() -> Result<(), OptimizerError> {
        // Minimize (x - 5)^2
        let problem = Quadratic {
            targets: vec![5.0],
        };
        let result = LevenbergMarquardt::default().optimize(&problem, &[0.0])?;

        assert!(result.iterations > 0);
        assert!(result.final_cost < 1e-6);
        assert_relative_eq!(result.params[0], 5.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_multi_variable_optimization() -> Result<(), OptimizerError> {
        // Minimize (x - 1)^2 + (y - 2)^2 + (z - 3)^2
        let problem = Quadratic {
            targets: vec![1.0, 2.0, 3.0],
        };
        let result = LevenbergMarquardt::default().optimize(&problem, &[0.0, 0.0, 0.0])?;

        assert!(result.final_cost < 1e-6);
        for (p, t) in result.params.iter().zip(&problem.targets) {
            assert_relative_eq!(p, t, epsilon = 1e-3);
        }
        Ok(())
    }

    #[test]
    fn test_unsuccessful_limit() -> Result<(), OptimizerError> {
        let lm = LevenbergMarquardt {
            lambda_init: 1e-3,
            lambda_min: 1e-3,
            cost_tolerance: 0.0,
            unsuccessful_iterations_allowed: 4,
            ..Default::default()
        };

        let mut min_lambda = f64::INFINITY;
        let result = lm.optimize_with_callback(&Kink, &[0.0], |state| {
            min_lambda = min_lambda.min(state.lambda);
            true
        })?;

        assert_eq!(result.termination_reason, TerminationReason::UnsuccessfulLimit);
        assert_eq!(result.iterations, lm.unsuccessful_iterations_allowed + 1);
        assert_eq!(result.accepted_steps, 0);
        assert_eq!(result.params, vec![0.0]);
        assert!(min_lambda >= lm.lambda_min);
        Ok(())
    }

    #[test]
    fn test_zero_gradient_respects_floor() -> Result<(), OptimizerError> {
        let lm = LevenbergMarquardt {
            lambda_init: 1e-8,
            lambda_min: 0.5,
            unsuccessful_iterations_allowed: 3,
            ..Default::default()
        };

        let mut lambdas = Vec::new();
        let result = lm.optimize_with_callback(&Flat, &[0.1, 0.2], |state| {
            lambdas.push(state.lambda);
            true
        })?;

        assert!(result.iterations <= lm.unsuccessful_iterations_allowed + 1);
        assert!(lambdas.iter().all(|&l| l >= lm.lambda_min));
        assert!(result.lambda >= lm.lambda_min);
        assert_eq!(result.params, vec![0.1, 0.2]);
        Ok(())
    }

    #[test]
    fn test_parameter_mismatch() {
        let problem = Quadratic {
            targets: vec![1.0, 2.0],
        };
        let res = LevenbergMarquardt::default().optimize(&problem, &[0.0]);
        assert_eq!(
            res.err(),
            Some(OptimizerError::ParameterMismatch {
                expected: 2,
                actual: 1
            })
        );
    }
}
