use nalgebra::{DMatrix, DVector};
use ottraj_types::{PlannerError, Result};
use sprs::CsMat;

/// QP in the form:
/// minimize 0.5 * x^T P x + q^T x
/// subject to clb <= A x <= cub, xlb <= x <= xub
#[derive(Debug, Clone)]
pub struct QpInstance {
    /// Cost matrix P, full symmetric storage
    pub p: CsMat<f64>,
    /// Linear term q
    pub q: Vec<f64>,
    /// General constraint matrix A
    pub a: CsMat<f64>,
    pub clb: Vec<f64>,
    pub cub: Vec<f64>,
    pub xlb: Vec<f64>,
    pub xub: Vec<f64>,
    /// Generation of the problem this instance was built from
    pub generation: u64,
}

impl QpInstance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        p: CsMat<f64>,
        q: Vec<f64>,
        a: CsMat<f64>,
        clb: Vec<f64>,
        cub: Vec<f64>,
        xlb: Vec<f64>,
        xub: Vec<f64>,
        generation: u64,
    ) -> Self {
        QpInstance { p, q, a, clb, cub, xlb, xub, generation }
    }

    /// Get number of variables
    pub fn num_vars(&self) -> usize {
        self.q.len()
    }

    /// Get number of general constraint rows
    pub fn num_constraints(&self) -> usize {
        self.clb.len()
    }

    pub fn is_equality_row(&self, i: usize) -> bool {
        self.clb[i] == self.cub[i]
    }

    pub fn is_fixed_var(&self, j: usize) -> bool {
        self.xlb[j] == self.xub[j]
    }

    /// Validate dimensions and bound ordering
    pub fn validate(&self) -> Result<()> {
        let n = self.num_vars();
        let m = self.num_constraints();

        if self.p.rows() != n || self.p.cols() != n {
            return Err(PlannerError::construction(format!(
                "P must be {}x{}, got {}x{}",
                n,
                n,
                self.p.rows(),
                self.p.cols()
            )));
        }
        if self.a.rows() != m || self.a.cols() != n {
            return Err(PlannerError::construction(format!(
                "A must be {}x{}, got {}x{}",
                m,
                n,
                self.a.rows(),
                self.a.cols()
            )));
        }
        if self.cub.len() != m || self.xlb.len() != n || self.xub.len() != n {
            return Err(PlannerError::construction("bound vectors do not match the QP dimensions"));
        }
        for i in 0..m {
            if self.clb[i].is_nan() || self.cub[i].is_nan() || self.clb[i] > self.cub[i] {
                return Err(PlannerError::construction(format!(
                    "row {} has bounds [{}, {}]",
                    i, self.clb[i], self.cub[i]
                )));
            }
        }
        for j in 0..n {
            if self.xlb[j].is_nan() || self.xub[j].is_nan() || self.xlb[j] > self.xub[j] {
                return Err(PlannerError::construction(format!(
                    "variable {} has bounds [{}, {}]",
                    j, self.xlb[j], self.xub[j]
                )));
            }
        }
        for (&v, (r, c)) in self.p.iter() {
            let mirror = self.p.get(c, r).copied().unwrap_or(0.0);
            if (v - mirror).abs() > 1e-9 * (1.0 + v.abs()) {
                return Err(PlannerError::construction(format!(
                    "P is not stored symmetric at ({}, {})",
                    r, c
                )));
            }
        }
        Ok(())
    }

    /// 0.5 x^T P x + q^T x
    pub fn objective(&self, x: &[f64]) -> f64 {
        let quad: f64 = self.p.iter().map(|(&v, (r, c))| v * x[r] * x[c]).sum();
        let lin: f64 = self.q.iter().zip(x).map(|(q, x)| q * x).sum();
        0.5 * quad + lin
    }

    /// A x
    pub fn row_values(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.num_constraints()];
        for (&v, (r, c)) in self.a.iter() {
            out[r] += v * x[c];
        }
        out
    }

    /// P x
    pub fn cost_gradient(&self, x: &[f64]) -> Vec<f64> {
        let mut out = self.q.clone();
        for (&v, (r, c)) in self.p.iter() {
            out[r] += v * x[c];
        }
        out
    }

    /// Largest violation over rows and variable bounds
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let ax = self.row_values(x);
        let rows = ax
            .iter()
            .enumerate()
            .map(|(i, v)| (self.clb[i] - v).max(v - self.cub[i]));
        let vars = x
            .iter()
            .enumerate()
            .map(|(j, v)| (self.xlb[j] - v).max(v - self.xub[j]));
        rows.chain(vars).fold(0.0, f64::max)
    }

    pub fn p_dense(&self) -> DMatrix<f64> {
        let n = self.num_vars();
        let mut out = DMatrix::zeros(n, n);
        for (&v, (r, c)) in self.p.iter() {
            out[(r, c)] += v;
        }
        out
    }

    /// Nonzeros of A grouped by row
    pub fn a_rows(&self) -> Vec<Vec<(usize, f64)>> {
        let mut rows = vec![Vec::new(); self.num_constraints()];
        for (&v, (r, c)) in self.a.iter() {
            rows[r].push((c, v));
        }
        rows
    }

    pub fn a_row_dense(&self, row: &[(usize, f64)]) -> DVector<f64> {
        let mut out = DVector::zeros(self.num_vars());
        for &(c, v) in row {
            out[c] += v;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn tiny() -> QpInstance {
        let mut p = TriMat::new((2, 2));
        p.add_triplet(0, 0, 2.0);
        p.add_triplet(1, 1, 4.0);
        p.add_triplet(0, 1, 1.0);
        p.add_triplet(1, 0, 1.0);
        let mut a = TriMat::new((1, 2));
        a.add_triplet(0, 0, 1.0);
        a.add_triplet(0, 1, 1.0);
        QpInstance::new(
            p.to_csc(),
            vec![1.0, 0.0],
            a.to_csc(),
            vec![1.0],
            vec![1.0],
            vec![0.0, 0.0],
            vec![2.0, 2.0],
            7,
        )
    }

    #[test]
    fn test_objective_and_rows() {
        let qp = tiny();
        assert!(qp.validate().is_ok());
        // 0.5 * (2 + 4*4 + 2*1*2) + 1
        assert_eq!(qp.objective(&[1.0, 2.0]), 12.0);
        assert_eq!(qp.row_values(&[1.0, 2.0]), vec![3.0]);
        assert_eq!(qp.max_violation(&[1.0, 2.0]), 2.0);
        assert_eq!(qp.max_violation(&[0.5, 0.5]), 0.0);
    }

    #[test]
    fn test_validate_catches_bad_shapes() {
        let mut qp = tiny();
        qp.xub.pop();
        assert!(matches!(qp.validate(), Err(PlannerError::Construction(_))));

        let mut qp = tiny();
        qp.clb[0] = 3.0;
        assert!(qp.validate().is_err());
    }

    #[test]
    fn test_rejects_triangle_storage() {
        let mut p = TriMat::new((2, 2));
        p.add_triplet(0, 0, 1.0);
        p.add_triplet(0, 1, 1.0);
        p.add_triplet(1, 1, 1.0);
        let mut qp = tiny();
        qp.p = p.to_csc();
        assert!(qp.validate().is_err());
    }
}
