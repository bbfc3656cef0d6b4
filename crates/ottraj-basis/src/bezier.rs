use nalgebra::DMatrix;
use ottraj_types::{PlannerError, Result};

/// Binomial coefficient as a float
pub fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut value = 1.0;
    for i in 0..k {
        value = value * (n - i) as f64 / (i + 1) as f64;
    }
    value.round()
}

/// Falling factorial n (n-1) ... (n-k+1)
pub fn falling(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64)
}

/// Matrix M with `monomial = M * bezier` for one axis of an order-`n` curve on s in [0, 1]
pub fn bezier_to_monomial(n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n + 1, n + 1, |i, j| {
        if j > i {
            0.0
        } else {
            let sign = if (i - j) % 2 == 0 { 1.0 } else { -1.0 };
            binomial(n, j) * binomial(n - j, i - j) * sign
        }
    })
}

/// Exact inverse of [`bezier_to_monomial`]: b_j = sum_{i<=j} C(j,i)/C(n,i) a_i
pub fn monomial_to_bezier(n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n + 1, n + 1, |j, i| {
        if i > j {
            0.0
        } else {
            binomial(j, i) / binomial(n, i)
        }
    })
}

/// Gram matrix of the r-th derivative of monomials over [0, 1]
pub fn monomial_energy(n: usize, r: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n + 1, n + 1, |i, j| {
        if i < r || j < r {
            0.0
        } else {
            falling(i, r) * falling(j, r) / (i + j + 1 - 2 * r) as f64
        }
    })
}

/// Precomputed, time-independent basis data for one polynomial order
#[derive(Debug, Clone)]
pub struct BezierBasis {
    order: usize,
    minimize_order: usize,
    m: DMatrix<f64>,
    m_inv: DMatrix<f64>,
    mqm: DMatrix<f64>,
}

impl BezierBasis {
    pub fn new(order: usize, minimize_order: usize) -> Result<Self> {
        if order == 0 {
            return Err(PlannerError::construction("basis order must be positive"));
        }
        if minimize_order > order {
            return Err(PlannerError::construction(format!(
                "cannot minimize derivative {} of an order {} polynomial",
                minimize_order, order
            )));
        }
        let m = bezier_to_monomial(order);
        let m_inv = monomial_to_bezier(order);
        let q = monomial_energy(order, minimize_order);
        let mqm = m.transpose() * q * &m;
        Ok(BezierBasis {
            order,
            minimize_order,
            m,
            m_inv,
            mqm,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn minimize_order(&self) -> usize {
        self.minimize_order
    }

    /// Bezier to monomial change of basis
    pub fn m(&self) -> &DMatrix<f64> {
        &self.m
    }

    /// Monomial to Bezier change of basis
    pub fn m_inverse(&self) -> &DMatrix<f64> {
        &self.m_inv
    }

    /// Weighting operator M^T Q M acting on Bezier control points
    pub fn mqm(&self) -> &DMatrix<f64> {
        &self.mqm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binomial_and_falling() {
        assert_eq!(binomial(6, 3), 20.0);
        assert_eq!(binomial(4, 5), 0.0);
        assert_eq!(falling(6, 3), 120.0);
        assert_eq!(falling(2, 3), 0.0);
        assert_eq!(falling(5, 0), 1.0);
    }

    #[test]
    fn test_cubic_bezier_matrix() {
        // P(s) = (1-s)^3 b0 + 3s(1-s)^2 b1 + 3s^2(1-s) b2 + s^3 b3
        let m = bezier_to_monomial(3);
        let expected = DMatrix::from_row_slice(4, 4, &[
            1.0, 0.0, 0.0, 0.0,
            -3.0, 3.0, 0.0, 0.0,
            3.0, -6.0, 3.0, 0.0,
            -1.0, 3.0, -3.0, 1.0,
        ]);
        assert_eq!(m, expected);
    }

    #[test]
    fn test_inverse_is_exact() {
        for n in 1..10 {
            let prod = bezier_to_monomial(n) * monomial_to_bezier(n);
            let err = (prod - DMatrix::identity(n + 1, n + 1)).abs().max();
            assert!(err < 1e-9, "order {} err {}", n, err);
        }
    }

    #[test]
    fn test_mqm_symmetric_psd_diagonal() {
        let basis = BezierBasis::new(6, 3).unwrap();
        let mqm = basis.mqm();
        assert!((mqm - mqm.transpose()).abs().max() < 1e-8);
        for i in 0..7 {
            assert!(mqm[(i, i)] > 0.0);
        }
    }

    #[test]
    fn test_energy_of_constant_velocity_line() {
        // A straight line at unit speed has zero jerk energy and unit velocity energy
        let points = nalgebra::DVector::from_fn(7, |j, _| j as f64 / 6.0);
        let jerk = BezierBasis::new(6, 3).unwrap();
        let vel = BezierBasis::new(6, 1).unwrap();
        assert!(points.dot(&(jerk.mqm() * &points)).abs() < 1e-9);
        assert!((points.dot(&(vel.mqm() * &points)) - 1.0).abs() < 1e-9);
    }
}
