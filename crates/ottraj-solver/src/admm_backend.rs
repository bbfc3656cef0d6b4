use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ottraj_types::{PlannerError, Result};
use serde::{Deserialize, Serialize};

use crate::backend::{SolveInfo, SolveResult, SolverBackend};
use crate::qp_instance::QpInstance;

const NAME: &str = "admm";

/// Equality rows get a stiffer penalty
const RHO_EQ_SCALE: f64 = 1e3;
const RHO_MIN: f64 = 1e-6;
const RHO_MAX: f64 = 1e6;
const POLISH_DELTA: f64 = 1e-6;
const POLISH_REFINE_ITERS: usize = 25;
const POLISH_MAX_PASSES: usize = 10;
/// Largest row or bound violation a polished point may keep
const POLISH_FEAS_TOL: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmmSettings {
    pub max_iter: usize,
    pub eps_abs: f64,
    pub eps_rel: f64,
    pub eps_prim_inf: f64,
    /// Initial penalty parameter
    pub rho: f64,
    pub sigma: f64,
    /// Over-relaxation parameter in (0, 2)
    pub alpha: f64,
    pub adaptive_rho: bool,
    pub polish: bool,
    /// Residuals are evaluated every `check_every` iterations
    pub check_every: usize,
}

impl Default for AdmmSettings {
    fn default() -> Self {
        AdmmSettings {
            max_iter: 20000,
            eps_abs: 1e-3,
            eps_rel: 1e-3,
            eps_prim_inf: 1e-4,
            rho: 0.1,
            sigma: 1e-6,
            alpha: 1.6,
            adaptive_rho: true,
            polish: true,
            check_every: 25,
        }
    }
}

impl AdmmSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 || self.check_every == 0 {
            return Err(PlannerError::ConfigError("ADMM iteration counts must be positive".into()));
        }
        if !(self.alpha > 0.0 && self.alpha < 2.0) {
            return Err(PlannerError::ConfigError(format!("ADMM alpha {} outside (0, 2)", self.alpha)));
        }
        if !(self.rho > 0.0 && self.sigma > 0.0 && self.eps_abs >= 0.0 && self.eps_rel >= 0.0) {
            return Err(PlannerError::ConfigError("ADMM penalties and tolerances must be positive".into()));
        }
        Ok(())
    }
}

/// ADMM exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmmStatus {
    Solved,
    MaxIterReached,
    PrimalInfeasible,
    NumericalError,
}

impl AdmmStatus {
    /// Positive codes mean solved
    pub fn code(self) -> i32 {
        match self {
            AdmmStatus::Solved => 1,
            AdmmStatus::MaxIterReached => -2,
            AdmmStatus::PrimalInfeasible => -3,
            AdmmStatus::NumericalError => -10,
        }
    }
}

/// Operator-splitting QP solver over the stacked constraint block [A; I]
pub struct AdmmSolver {
    settings: AdmmSettings,
}

impl AdmmSolver {
    pub fn new() -> Self {
        AdmmSolver {
            settings: AdmmSettings::default(),
        }
    }

    pub fn with_settings(settings: AdmmSettings) -> Result<Self> {
        settings.validate()?;
        Ok(AdmmSolver { settings })
    }

    pub fn settings(&self) -> &AdmmSettings {
        &self.settings
    }
}

impl Default for AdmmSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// General rows followed by one identity row per variable
struct Stacked {
    rows: Vec<Vec<(usize, f64)>>,
    n: usize,
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl Stacked {
    fn new(qp: &QpInstance) -> Self {
        let lower = qp.clb.iter().chain(qp.xlb.iter()).copied().collect::<Vec<_>>();
        let upper = qp.cub.iter().chain(qp.xub.iter()).copied().collect::<Vec<_>>();
        Stacked {
            rows: qp.a_rows(),
            n: qp.num_vars(),
            lower: DVector::from_vec(lower),
            upper: DVector::from_vec(upper),
        }
    }

    fn len(&self) -> usize {
        self.rows.len() + self.n
    }

    fn is_equality(&self, i: usize) -> bool {
        self.lower[i] == self.upper[i]
    }

    fn mul(&self, x: &DVector<f64>) -> DVector<f64> {
        let m = self.rows.len();
        DVector::from_fn(self.len(), |i, _| {
            if i < m {
                self.rows[i].iter().map(|&(c, v)| v * x[c]).sum()
            } else {
                x[i - m]
            }
        })
    }

    fn mul_t(&self, y: &DVector<f64>) -> DVector<f64> {
        let m = self.rows.len();
        let mut out = DVector::from_fn(self.n, |j, _| y[m + j]);
        for (i, row) in self.rows.iter().enumerate() {
            for &(c, v) in row {
                out[c] += v * y[i];
            }
        }
        out
    }

    fn rho_vector(&self, rho: f64) -> DVector<f64> {
        DVector::from_fn(self.len(), |i, _| if self.is_equality(i) { rho * RHO_EQ_SCALE } else { rho })
    }

    /// Cholesky of P + sigma I + Abar^T diag(rho) Abar
    fn factor(&self, p: &DMatrix<f64>, rho_vec: &DVector<f64>, sigma: f64) -> Option<Cholesky<f64, Dyn>> {
        let m = self.rows.len();
        let mut k = p.clone();
        for j in 0..self.n {
            k[(j, j)] += sigma + rho_vec[m + j];
        }
        for (i, row) in self.rows.iter().enumerate() {
            for &(c1, v1) in row {
                for &(c2, v2) in row {
                    k[(c1, c2)] += rho_vec[i] * v1 * v2;
                }
            }
        }
        k.cholesky()
    }
}

struct Residuals {
    prim: f64,
    dual: f64,
    eps_prim: f64,
    eps_dual: f64,
    prim_scale: f64,
    dual_scale: f64,
}

impl AdmmSolver {
    fn residuals(
        &self,
        p: &DMatrix<f64>,
        q: &DVector<f64>,
        stacked: &Stacked,
        x: &DVector<f64>,
        z: &DVector<f64>,
        y: &DVector<f64>,
    ) -> Residuals {
        let ax = stacked.mul(x);
        let px = p * x;
        let aty = stacked.mul_t(y);
        let prim = (&ax - z).amax();
        let dual = (&px + q + &aty).amax();
        let prim_scale = ax.amax().max(z.amax());
        let dual_scale = px.amax().max(aty.amax()).max(q.amax());
        Residuals {
            prim,
            dual,
            eps_prim: self.settings.eps_abs + self.settings.eps_rel * prim_scale,
            eps_dual: self.settings.eps_abs + self.settings.eps_rel * dual_scale,
            prim_scale,
            dual_scale,
        }
    }

    /// Certificate check on the change of the dual iterate
    fn is_primal_infeasible(&self, stacked: &Stacked, dy: &DVector<f64>) -> bool {
        let dy_norm = dy.amax();
        if dy_norm < 1e-12 {
            return false;
        }
        let eps = self.settings.eps_prim_inf * dy_norm;
        if stacked.mul_t(dy).amax() > eps {
            return false;
        }
        let support: f64 = dy
            .iter()
            .enumerate()
            .filter(|(_, d)| **d != 0.0)
            .map(|(i, d)| if *d > 0.0 { stacked.upper[i] * d } else { stacked.lower[i] * d })
            .sum();
        support < -eps
    }

    /// Solve the equality KKT system with `active` rows held at their bounds
    fn solve_reduced(
        &self,
        p: &DMatrix<f64>,
        q: &DVector<f64>,
        stacked: &Stacked,
        active: &[(usize, bool)],
    ) -> Option<(DVector<f64>, DVector<f64>)> {
        let n = stacked.n;
        let m = stacked.rows.len();
        let dim = n + active.len();
        let mut kkt = DMatrix::zeros(dim, dim);
        kkt.view_mut((0, 0), (n, n)).copy_from(p);
        let mut rhs = DVector::zeros(dim);
        for j in 0..n {
            rhs[j] = -q[j];
        }
        for (k, &(i, upper)) in active.iter().enumerate() {
            let r = n + k;
            if i < m {
                for &(c, v) in &stacked.rows[i] {
                    kkt[(r, c)] += v;
                    kkt[(c, r)] += v;
                }
            } else {
                kkt[(r, i - m)] = 1.0;
                kkt[(i - m, r)] = 1.0;
            }
            rhs[r] = if upper { stacked.upper[i] } else { stacked.lower[i] };
        }

        let mut reg = kkt.clone();
        for j in 0..dim {
            reg[(j, j)] += if j < n { POLISH_DELTA } else { -POLISH_DELTA };
        }
        let lu = reg.lu();
        let mut sol = lu.solve(&rhs)?;
        // Refine against the unregularized system until the residual stalls at rounding level
        let tol = 1e-14 * (1.0 + rhs.amax());
        for _ in 0..POLISH_REFINE_ITERS {
            let res = &rhs - &kkt * &sol;
            if res.amax() <= tol {
                break;
            }
            sol += lu.solve(&res)?;
        }

        let x = sol.rows(0, n).into_owned();
        let mut y = DVector::zeros(stacked.len());
        for (k, &(i, _)) in active.iter().enumerate() {
            y[i] = sol[n + k];
        }
        Some((x, y))
    }

    /// Recover an exact solution from the ADMM iterate
    ///
    /// The first active set is guessed from (z, y). Each pass releases
    /// inequalities whose multiplier has the wrong sign and adds rows the
    /// reduced solution violates, until both lists are empty.
    fn polish(
        &self,
        p: &DMatrix<f64>,
        q: &DVector<f64>,
        stacked: &Stacked,
        z: &DVector<f64>,
        y: &DVector<f64>,
    ) -> Option<(DVector<f64>, DVector<f64>)> {
        // (stacked row, upper side)
        let mut active = Vec::new();
        for i in 0..stacked.len() {
            if stacked.is_equality(i) {
                active.push((i, true));
            } else if z[i] - stacked.lower[i] < -y[i] {
                active.push((i, false));
            } else if stacked.upper[i] - z[i] < y[i] {
                active.push((i, true));
            }
        }

        for pass in 1..=POLISH_MAX_PASSES {
            let (x, y_pol) = self.solve_reduced(p, q, stacked, &active)?;
            let sign_tol = self.settings.eps_abs * (1.0 + y_pol.amax());
            let wrong_sign: Vec<(usize, bool)> = active
                .iter()
                .copied()
                .filter(|&(i, upper)| {
                    !stacked.is_equality(i) && if upper { y_pol[i] < -sign_tol } else { y_pol[i] > sign_tol }
                })
                .collect();
            let ax = stacked.mul(&x);
            let violated: Vec<(usize, bool)> = (0..stacked.len())
                .filter_map(|i| {
                    if ax[i] > stacked.upper[i] + POLISH_FEAS_TOL {
                        Some((i, true))
                    } else if ax[i] < stacked.lower[i] - POLISH_FEAS_TOL {
                        Some((i, false))
                    } else {
                        None
                    }
                })
                .collect();
            if wrong_sign.is_empty() && violated.is_empty() {
                tracing::debug!("ADMM polish settled after {} passes on {} active rows", pass, active.len());
                return Some((x, y_pol));
            }
            tracing::debug!(
                "ADMM polish pass {}: releasing {} rows, adding {}",
                pass,
                wrong_sign.len(),
                violated.len()
            );
            active.retain(|entry| !wrong_sign.contains(entry));
            for entry in violated {
                if !active.iter().any(|&(i, _)| i == entry.0) {
                    active.push(entry);
                }
            }
        }
        None
    }
}

impl SolverBackend for AdmmSolver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve_once(&mut self, qp: &QpInstance) -> Result<SolveResult> {
        qp.validate()?;
        let s = &self.settings;
        let n = qp.num_vars();
        let n_con = qp.num_constraints();
        let p = qp.p_dense();
        let q = DVector::from_column_slice(&qp.q);
        let stacked = Stacked::new(qp);
        let total = stacked.len();

        let mut rho = s.rho;
        let mut rho_vec = stacked.rho_vector(rho);
        let mut chol = match stacked.factor(&p, &rho_vec, s.sigma) {
            Some(c) => c,
            None => {
                tracing::debug!("ADMM: KKT factorization failed");
                return Ok(SolveResult::failed(qp, NAME, AdmmStatus::NumericalError.code(), 0));
            }
        };

        let mut x = DVector::zeros(n);
        let mut z = DVector::zeros(total);
        let mut y = DVector::zeros(total);
        let mut status = AdmmStatus::MaxIterReached;
        let mut iterations = 0;

        for k in 1..=s.max_iter {
            iterations = k;
            let y_prev = y.clone();

            let rhs = &x * s.sigma - &q + stacked.mul_t(&(rho_vec.component_mul(&z) - &y));
            let x_tilde = chol.solve(&rhs);
            let z_tilde = stacked.mul(&x_tilde);
            let x_next = &x_tilde * s.alpha + &x * (1.0 - s.alpha);
            let z_relaxed = &z_tilde * s.alpha + &z * (1.0 - s.alpha);
            let z_next = DVector::from_fn(total, |i, _| {
                (z_relaxed[i] + y[i] / rho_vec[i]).clamp(stacked.lower[i], stacked.upper[i])
            });
            y += (&z_relaxed - &z_next).component_mul(&rho_vec);
            x = x_next;
            z = z_next;

            if k % s.check_every != 0 && k != s.max_iter {
                continue;
            }

            let res = self.residuals(&p, &q, &stacked, &x, &z, &y);
            if res.prim <= res.eps_prim && res.dual <= res.eps_dual {
                status = AdmmStatus::Solved;
                break;
            }
            if self.is_primal_infeasible(&stacked, &(&y - &y_prev)) {
                status = AdmmStatus::PrimalInfeasible;
                break;
            }
            if s.adaptive_rho && res.dual > 0.0 && res.prim_scale > 0.0 && res.dual_scale > 0.0 {
                let ratio = ((res.prim / res.prim_scale) / (res.dual / res.dual_scale)).sqrt();
                let candidate = (rho * ratio).clamp(RHO_MIN, RHO_MAX);
                if candidate > 5.0 * rho || candidate < 0.2 * rho {
                    rho = candidate;
                    rho_vec = stacked.rho_vector(rho);
                    chol = match stacked.factor(&p, &rho_vec, s.sigma) {
                        Some(c) => c,
                        None => {
                            status = AdmmStatus::NumericalError;
                            break;
                        }
                    };
                }
            }
        }

        tracing::debug!("ADMM finished: {:?} after {} iterations (rho {:.3e})", status, iterations, rho);
        if status != AdmmStatus::Solved {
            return Ok(SolveResult::failed(qp, NAME, status.code(), iterations));
        }

        let mut polished = false;
        if s.polish {
            let admm_viol = qp.max_violation(x.as_slice());
            let admm_dual = self.residuals(&p, &q, &stacked, &x, &z, &y).dual;
            match self.polish(&p, &q, &stacked, &z, &y) {
                Some((xp, yp)) => {
                    let dual = (&p * &xp + &q + stacked.mul_t(&yp)).amax();
                    if dual <= admm_dual.max(1e-9) {
                        x = xp;
                        y = yp;
                        polished = true;
                    } else {
                        tracing::warn!("ADMM polish rejected (dual residual {:.2e})", dual);
                    }
                }
                None => tracing::warn!(
                    "ADMM polish failed, keeping the iterate with violation {:.2e}",
                    admm_viol
                ),
            }
        }

        let x_vec: Vec<f64> = x.iter().copied().collect();
        Ok(SolveResult {
            is_solved: status.code() > 0,
            objective: qp.objective(&x_vec),
            lmdy: y.rows(0, n_con).iter().copied().collect(),
            lmdz: y.rows(n_con, n).iter().copied().collect(),
            x: x_vec,
            info: SolveInfo {
                backend: NAME,
                status_code: status.code(),
                iterations,
                generation: qp.generation,
                polished,
                cold_restart: false,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn diag_qp(p: &[f64], q: &[f64], xlb: &[f64], xub: &[f64]) -> QpInstance {
        let n = p.len();
        let mut pm = TriMat::new((n, n));
        for (i, v) in p.iter().enumerate() {
            pm.add_triplet(i, i, *v);
        }
        QpInstance::new(
            pm.to_csc(),
            q.to_vec(),
            TriMat::new((0, n)).to_csc(),
            vec![],
            vec![],
            xlb.to_vec(),
            xub.to_vec(),
            0,
        )
    }

    #[test]
    fn test_box_qp_polished() {
        // min 0.5 x^2 + 0.5 y^2 - 2x + y, 0 <= x, y <= 1
        let qp = diag_qp(&[1.0, 1.0], &[-2.0, 1.0], &[0.0, 0.0], &[1.0, 1.0]);
        let mut solver = AdmmSolver::new();
        let res = solver.solve_once(&qp).unwrap();

        assert!(res.is_solved);
        assert!(res.info.polished);
        assert!((res.x[0] - 1.0).abs() < 1e-8);
        assert!(res.x[1].abs() < 1e-8);
        // Upper bound on x pushes back with multiplier 1, lower bound on y with 1
        assert!((res.lmdz[0] - 1.0).abs() < 1e-6);
        assert!((res.lmdz[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_infeasible_row() {
        let mut a = TriMat::new((2, 1));
        a.add_triplet(0, 0, 1.0);
        a.add_triplet(1, 0, 1.0);
        let mut p = TriMat::new((1, 1));
        p.add_triplet(0, 0, 1.0);
        let qp = QpInstance::new(
            p.to_csc(),
            vec![0.0],
            a.to_csc(),
            vec![1.0, -5.0],
            vec![5.0, -1.0],
            vec![-10.0],
            vec![10.0],
            3,
        );
        let res = AdmmSolver::new().solve_once(&qp).unwrap();
        assert!(!res.is_solved);
        assert_eq!(res.objective, f64::INFINITY);
        assert!(res.info.status_code < 0);
        assert_eq!(res.info.generation, 3);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = AdmmSettings::default();
        settings.alpha = 2.5;
        assert!(AdmmSolver::with_settings(settings).is_err());
    }
}
