/// Weighted normal equations `AᵀWA x = AᵀWy` accumulated row by row in double precision.
///
/// The matrix is dense and row major. Partial systems built on different
/// threads are combined with [`NormalEquations::merge`], which makes the
/// accumulation order independent of how rows are partitioned.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    dim: usize,
    ata: Vec<f64>,
    atb: Vec<f64>,
    rows: usize,
}

impl NormalEquations {
    /// Create an empty system with `dim` unknowns.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ata: vec![0.0; dim * dim],
            atb: vec![0.0; dim],
            rows: 0,
        }
    }

    /// Number of unknowns.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of rows accumulated so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The accumulated `AᵀWA` matrix, row major.
    pub fn ata(&self) -> &[f64] {
        &self.ata
    }

    /// The accumulated `AᵀWy` vector.
    pub fn atb(&self) -> &[f64] {
        &self.atb
    }

    /// Add a dense row `a` with target `y` and weight `w`.
    ///
    /// Rows with a non-positive or non-finite weight are ignored.
    pub fn add_row(&mut self, a: &[f64], y: f64, w: f64) {
        debug_assert_eq!(a.len(), self.dim);
        if !(w.is_finite() && w > 0.0) {
            return;
        }
        for (i, &ai) in a.iter().enumerate() {
            if ai == 0.0 {
                continue;
            }
            let wai = w * ai;
            self.atb[i] += wai * y;
            let row = &mut self.ata[i * self.dim..(i + 1) * self.dim];
            for (dst, &aj) in row.iter_mut().zip(a) {
                *dst += wai * aj;
            }
        }
        self.rows += 1;
    }

    /// Add a sparse row given by `(index, value)` pairs.
    pub fn add_sparse_row(&mut self, entries: &[(usize, f64)], y: f64, w: f64) {
        if !(w.is_finite() && w > 0.0) {
            return;
        }
        for &(i, ai) in entries {
            let wai = w * ai;
            self.atb[i] += wai * y;
            for &(j, aj) in entries {
                self.ata[i * self.dim + j] += wai * aj;
            }
        }
        self.rows += 1;
    }

    /// Add the contents of another system with the same number of unknowns.
    pub fn merge(mut self, other: &NormalEquations) -> Self {
        debug_assert_eq!(self.dim, other.dim);
        self.ata
            .iter_mut()
            .zip(&other.ata)
            .for_each(|(a, b)| *a += b);
        self.atb
            .iter_mut()
            .zip(&other.atb)
            .for_each(|(a, b)| *a += b);
        self.rows += other.rows;
        self
    }

    /// Largest absolute entry of `AᵀWy`, used to scale solver tolerances.
    pub fn rhs_scale(&self) -> f64 {
        self.atb.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dense_and_sparse_rows_agree() {
        let mut dense = NormalEquations::new(3);
        dense.add_row(&[1.0, 0.0, 2.0], 3.0, 0.5);
        dense.add_row(&[0.0, 1.0, 1.0], -1.0, 2.0);

        let mut sparse = NormalEquations::new(3);
        sparse.add_sparse_row(&[(0, 1.0), (2, 2.0)], 3.0, 0.5);
        sparse.add_sparse_row(&[(1, 1.0), (2, 1.0)], -1.0, 2.0);

        assert_eq!(dense, sparse);
        assert_relative_eq!(dense.ata()[2 * 3 + 2], 0.5 * 4.0 + 2.0);
        assert_relative_eq!(dense.atb()[2], 0.5 * 2.0 * 3.0 - 2.0);
    }

    #[test]
    fn zero_weight_rows_are_skipped() {
        let mut eq = NormalEquations::new(2);
        eq.add_row(&[1.0, 1.0], 1.0, 0.0);
        eq.add_row(&[1.0, 1.0], 1.0, f64::NAN);
        assert_eq!(eq.rows(), 0);
        assert_eq!(eq.rhs_scale(), 0.0);
    }

    #[test]
    fn merge_is_partition_independent() {
        let rows = [([1.0, 2.0], 1.0), ([0.5, -1.0], 2.0), ([3.0, 0.0], -1.0)];

        let mut whole = NormalEquations::new(2);
        rows.iter().for_each(|(a, y)| whole.add_row(a, *y, 1.0));

        let mut first = NormalEquations::new(2);
        first.add_row(&rows[0].0, rows[0].1, 1.0);
        let mut second = NormalEquations::new(2);
        rows[1..].iter().for_each(|(a, y)| second.add_row(a, *y, 1.0));

        let merged = first.merge(&second);
        assert_eq!(merged.rows(), 3);
        for (a, b) in merged.ata().iter().zip(whole.ata()) {
            assert_relative_eq!(a, b);
        }
    }
}
