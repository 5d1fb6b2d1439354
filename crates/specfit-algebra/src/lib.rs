#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Normal equations accumulated from weighted rows.
pub mod normal_equations;

/// Lawson-Hanson active-set nonnegative least squares.
pub mod nnls;

/// Levenberg-Marquardt optimizer for small dense problems.
pub mod levenberg_marquardt;

mod dense;

pub use crate::levenberg_marquardt::{
    LeastSquaresProblem, LevenbergMarquardt, OptimizerError, OptimizerResult, OptimizerState,
    TerminationReason,
};
pub use crate::nnls::{NnlsError, NnlsSolution, NonNegativeLeastSquares};
pub use crate::normal_equations::NormalEquations;
