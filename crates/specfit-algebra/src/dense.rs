use faer::prelude::SpSolver;
use faer::Mat;

/// Solve the square system formed by the rows and columns `idx` of the
/// row-major `dim x dim` matrix `m` against the matching entries of `rhs`.
///
/// Returns `None` when the system is singular, i.e. the LU solve produces
/// non-finite values.
pub(crate) fn solve_subsystem(
    m: &[f64],
    dim: usize,
    rhs: &[f64],
    idx: &[usize],
) -> Option<Vec<f64>> {
    let k = idx.len();
    if k == 0 {
        return Some(Vec::new());
    }

    let a = Mat::<f64>::from_fn(k, k, |r, c| m[idx[r] * dim + idx[c]]);
    let b = Mat::<f64>::from_fn(k, 1, |r, _| rhs[idx[r]]);

    let sol = a.partial_piv_lu().solve(b.as_ref());
    let x: Vec<f64> = (0..k).map(|r| sol.read(r, 0)).collect();

    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Solve the full row-major `dim x dim` system `m x = rhs`.
pub(crate) fn solve(m: &[f64], dim: usize, rhs: &[f64]) -> Option<Vec<f64>> {
    let idx: Vec<usize> = (0..dim).collect();
    solve_subsystem(m, dim, rhs, &idx)
}
