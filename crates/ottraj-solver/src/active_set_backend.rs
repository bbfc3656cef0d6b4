use std::collections::BTreeMap;

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ottraj_types::{PlannerError, Result};
use serde::{Deserialize, Serialize};

use crate::backend::{SolveInfo, SolveResult, SolverBackend};
use crate::qp_instance::QpInstance;

const NAME: &str = "active-set";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSetSettings {
    pub max_iter: usize,
    /// Relative tolerance when testing one-sided constraints
    pub feasibility_tol: f64,
    /// Violation above which a warm-started point is thrown away
    pub warm_start_tol: f64,
}

impl Default for ActiveSetSettings {
    fn default() -> Self {
        ActiveSetSettings {
            max_iter: 500,
            feasibility_tol: 1e-9,
            warm_start_tol: 1e-6,
        }
    }
}

impl ActiveSetSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 || !(self.feasibility_tol > 0.0) || !(self.warm_start_tol > 0.0) {
            return Err(PlannerError::ConfigError("active-set limits must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BoundSide {
    Lower,
    Upper,
}

/// One side of a general row or variable bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintRef {
    Row(usize, BoundSide),
    Var(usize, BoundSide),
}

/// Exit of the dual active-set iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSetExit {
    Optimal,
    Infeasible,
    IterationLimit,
    Numerical,
}

impl ActiveSetExit {
    /// `1` is the only solved code
    pub fn info(self) -> i32 {
        match self {
            ActiveSetExit::Optimal => 1,
            ActiveSetExit::Infeasible => 2,
            ActiveSetExit::IterationLimit => 3,
            ActiveSetExit::Numerical => 4,
        }
    }
}

/// Warm-start state carried from one solve to the next
///
/// Only meaningful between closely related instances of the same problem;
/// a shape change clears it.
#[derive(Debug, Clone, Default)]
pub struct WarmStart {
    shape: Option<(usize, usize)>,
    working_set: Vec<ConstraintRef>,
    pub solves: usize,
    pub cold_restarts: usize,
}

impl WarmStart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.shape = None;
        self.working_set.clear();
    }

    pub fn is_warm(&self) -> bool {
        self.shape.is_some()
    }

    pub fn working_set(&self) -> &[ConstraintRef] {
        &self.working_set
    }

    fn matches(&self, qp: &QpInstance) -> bool {
        self.shape == Some((qp.num_vars(), qp.num_constraints()))
    }

    fn store(&mut self, qp: &QpInstance, working_set: Vec<ConstraintRef>) {
        self.shape = Some((qp.num_vars(), qp.num_constraints()));
        self.working_set = working_set;
    }
}

/// Raw output of the active-set method
#[derive(Debug, Clone)]
pub struct ActiveSetSolution {
    pub exit: ActiveSetExit,
    pub x: Vec<f64>,
    /// Lagrange multipliers, variables first then rows; positive when the
    /// lower side is binding
    pub multipliers: Vec<f64>,
    pub iterations: usize,
    pub warm_started: bool,
    pub cold_restart: bool,
}

/// Inequality `normal . w >= rhs` in null-space coordinates
struct OneSided {
    normal: DVector<f64>,
    rhs: f64,
    source: ConstraintRef,
}

/// QP restricted to the null space of its equality rows: x = x0 + Z w
struct Reduced {
    x0: DVector<f64>,
    z: DMatrix<f64>,
    h: Cholesky<f64, Dyn>,
    g: DVector<f64>,
    cons: Vec<OneSided>,
    eq_rows: Vec<(DVector<f64>, ConstraintRef)>,
}

enum Reduction {
    Ready(Reduced),
    Failed(ActiveSetExit),
}

/// Orthonormal basis of the row space of `rows` followed by its complement.
/// Returns the basis and the rank of `rows`.
fn orthonormal_completion(rows: &[DVector<f64>], n: usize) -> (Vec<DVector<f64>>, usize) {
    let mut basis: Vec<DVector<f64>> = Vec::with_capacity(n);
    for row in rows {
        let norm = row.norm();
        if norm == 0.0 {
            continue;
        }
        let mut v = row.clone();
        for _ in 0..2 {
            for b in &basis {
                let c = b.dot(&v);
                v.axpy(-c, b, 1.0);
            }
        }
        let rn = v.norm();
        if rn > 1e-10 * norm {
            basis.push(v / rn);
        }
    }
    let rank = basis.len();

    // Pivoted Gram-Schmidt on the unit vectors fills the complement
    let mut residual = DMatrix::<f64>::identity(n, n);
    for b in &basis {
        let proj = b.transpose() * &residual;
        residual -= b * proj;
    }
    while basis.len() < n {
        let (best, norm) = (0..n)
            .map(|j| (j, residual.column(j).norm()))
            .fold((0, 0.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        if norm < 1e-8 {
            break;
        }
        let mut v: DVector<f64> = residual.column(best).into_owned();
        for b in &basis {
            let c = b.dot(&v);
            v.axpy(-c, b, 1.0);
        }
        let v = v.normalize();
        let proj = v.transpose() * &residual;
        residual -= &v * proj;
        basis.push(v);
    }
    (basis, rank)
}

/// Active-set QP method in the style of Goldfarb and Idnani: starts from the
/// unconstrained minimizer on the equality null space and adds violated
/// constraints one at a time while keeping every multiplier nonnegative.
pub struct ActiveSetSolver {
    settings: ActiveSetSettings,
}

impl ActiveSetSolver {
    pub fn new(settings: ActiveSetSettings) -> Self {
        ActiveSetSolver { settings }
    }

    pub fn settings(&self) -> &ActiveSetSettings {
        &self.settings
    }

    fn reduce(&self, qp: &QpInstance) -> Reduction {
        let n = qp.num_vars();
        let tol = self.settings.feasibility_tol;
        let p = qp.p_dense();
        let q = DVector::from_column_slice(&qp.q);

        let mut eq_rows = Vec::new();
        let mut eq_rhs = Vec::new();
        // (row, lower, upper, lower ref, upper ref)
        let mut ineq = Vec::new();
        for (i, row) in qp.a_rows().iter().enumerate() {
            let dense = qp.a_row_dense(row);
            if qp.is_equality_row(i) {
                eq_rhs.push(qp.clb[i]);
                eq_rows.push((dense, ConstraintRef::Row(i, BoundSide::Lower)));
            } else {
                ineq.push((dense, qp.clb[i], qp.cub[i], ConstraintRef::Row(i, BoundSide::Lower), ConstraintRef::Row(i, BoundSide::Upper)));
            }
        }
        for j in 0..n {
            let mut unit = DVector::zeros(n);
            unit[j] = 1.0;
            if qp.is_fixed_var(j) {
                eq_rhs.push(qp.xlb[j]);
                eq_rows.push((unit, ConstraintRef::Var(j, BoundSide::Lower)));
            } else {
                ineq.push((unit, qp.xlb[j], qp.xub[j], ConstraintRef::Var(j, BoundSide::Lower), ConstraintRef::Var(j, BoundSide::Upper)));
            }
        }

        let x0 = if eq_rows.is_empty() {
            DVector::zeros(n)
        } else {
            let a_eq = DMatrix::from_fn(eq_rows.len(), n, |r, c| eq_rows[r].0[c]);
            let b = DVector::from_vec(eq_rhs);
            let x0 = match a_eq.clone().svd(true, true).solve(&b, 1e-12) {
                Ok(x0) => x0,
                Err(_) => return Reduction::Failed(ActiveSetExit::Numerical),
            };
            let residual = (&a_eq * &x0 - &b).amax();
            if residual > 1e-8 * (1.0 + b.amax()) {
                tracing::debug!("Active set: inconsistent equality rows (residual {:.2e})", residual);
                return Reduction::Failed(ActiveSetExit::Infeasible);
            }
            x0
        };

        let rows: Vec<DVector<f64>> = eq_rows.iter().map(|(r, _)| r.clone()).collect();
        let (basis, rank) = orthonormal_completion(&rows, n);
        let nz = basis.len() - rank;
        let z = DMatrix::from_fn(n, nz, |r, c| basis[rank + c][r]);

        let mut h = z.transpose() * &p * &z;
        let g = z.transpose() * (&p * &x0 + &q);
        let max_diag = (0..nz).map(|i| h[(i, i)].abs()).fold(0.0, f64::max);
        let chol = match h.clone().cholesky() {
            Some(c) => c,
            None => {
                for i in 0..nz {
                    h[(i, i)] += 1e-10 * (1.0 + max_diag);
                }
                match h.cholesky() {
                    Some(c) => c,
                    None => return Reduction::Failed(ActiveSetExit::Numerical),
                }
            }
        };

        let mut cons = Vec::new();
        for (row, lb, ub, lower_ref, upper_ref) in ineq {
            let normal = z.transpose() * &row;
            let ax0 = row.dot(&x0);
            if normal.norm() <= 1e-9 * row.norm() {
                // Fixed by the equality rows
                if lb - ax0 > tol * (1.0 + lb.abs()) || ax0 - ub > tol * (1.0 + ub.abs()) {
                    return Reduction::Failed(ActiveSetExit::Infeasible);
                }
                continue;
            }
            if lb.is_finite() {
                cons.push(OneSided {
                    normal: normal.clone(),
                    rhs: lb - ax0,
                    source: lower_ref,
                });
            }
            if ub.is_finite() {
                cons.push(OneSided {
                    normal: -normal,
                    rhs: ax0 - ub,
                    source: upper_ref,
                });
            }
        }

        Reduction::Ready(Reduced {
            x0,
            z,
            h: chol,
            g,
            cons,
            eq_rows,
        })
    }

    /// Minimizer with `active` held as equalities, with its multipliers
    fn solve_working(red: &Reduced, active: &[usize]) -> Option<(DVector<f64>, Vec<f64>)> {
        let hg = red.h.solve(&red.g);
        if active.is_empty() {
            return Some((-hg, Vec::new()));
        }
        let k = active.len();
        let mut hn = DMatrix::zeros(red.g.len(), k);
        for (col, &j) in active.iter().enumerate() {
            hn.set_column(col, &red.h.solve(&red.cons[j].normal));
        }
        let m = DMatrix::from_fn(k, k, |a, b| red.cons[active[a]].normal.dot(&hn.column(b)));
        let rhs = DVector::from_fn(k, |a, _| red.cons[active[a]].rhs + red.cons[active[a]].normal.dot(&hg));
        let u = m.cholesky()?.solve(&rhs);
        let w = -hg + &hn * &u;
        Some((w, u.iter().copied().collect()))
    }

    /// Primal step direction and multiplier change for adding constraint `p`
    fn step_direction(red: &Reduced, active: &[usize], p: usize) -> Option<(DVector<f64>, Vec<f64>, f64)> {
        let np = &red.cons[p].normal;
        let hnp = red.h.solve(np);
        let scale = np.dot(&hnp);
        if active.is_empty() {
            return Some((hnp, Vec::new(), scale));
        }
        let k = active.len();
        let mut hn = DMatrix::zeros(np.len(), k);
        for (col, &j) in active.iter().enumerate() {
            hn.set_column(col, &red.h.solve(&red.cons[j].normal));
        }
        let m = DMatrix::from_fn(k, k, |a, b| red.cons[active[a]].normal.dot(&hn.column(b)));
        let rhs = DVector::from_fn(k, |a, _| red.cons[active[a]].normal.dot(&hnp));
        let r = m.cholesky()?.solve(&rhs);
        let z = hnp - &hn * &r;
        Some((z, r.iter().copied().collect(), scale))
    }

    fn most_violated(&self, red: &Reduced, w: &DVector<f64>, in_active: &[bool]) -> Option<usize> {
        let tol = self.settings.feasibility_tol;
        let mut best = None;
        let mut best_score = 0.0;
        for (i, c) in red.cons.iter().enumerate() {
            if in_active[i] {
                continue;
            }
            let viol = c.rhs - c.normal.dot(w);
            if viol > tol * (1.0 + c.rhs.abs()) {
                let score = viol / c.normal.norm();
                if score > best_score {
                    best_score = score;
                    best = Some(i);
                }
            }
        }
        best
    }

    /// Dual active-set iteration from an initial working set
    fn iterate(&self, red: &Reduced, initial: Vec<usize>) -> (ActiveSetExit, DVector<f64>, Vec<usize>, Vec<f64>, usize) {
        let mut active = initial;
        // Drop warm constraints until the working-set minimizer is dual feasible
        let (mut w, mut u) = loop {
            match Self::solve_working(red, &active) {
                Some((w, u)) => match u.iter().enumerate().filter(|(_, v)| **v < 0.0).min_by(|a, b| a.1.total_cmp(b.1)) {
                    Some((k, _)) => {
                        active.remove(k);
                    }
                    None => break (w, u),
                },
                None => active.clear(),
            }
        };

        let mut in_active = vec![false; red.cons.len()];
        for &j in &active {
            in_active[j] = true;
        }

        let mut iterations = 0;
        loop {
            iterations += 1;
            if iterations > self.settings.max_iter {
                return (ActiveSetExit::IterationLimit, w, active, u, iterations - 1);
            }
            let p = match self.most_violated(red, &w, &in_active) {
                Some(p) => p,
                None => return (ActiveSetExit::Optimal, w, active, u, iterations),
            };

            let mut added = 0.0;
            loop {
                let (z, r, scale) = match Self::step_direction(red, &active, p) {
                    Some(d) => d,
                    None => return (ActiveSetExit::Numerical, w, active, u, iterations),
                };
                let np = &red.cons[p].normal;
                let zn = z.dot(np);

                // Largest dual step keeping the working multipliers nonnegative
                let mut t_dual = f64::INFINITY;
                let mut blocking = None;
                for (k, &rk) in r.iter().enumerate() {
                    if rk > 1e-12 {
                        let t = u[k] / rk;
                        if t < t_dual {
                            t_dual = t;
                            blocking = Some(k);
                        }
                    }
                }
                // Full step that makes constraint p hold with equality
                let t_primal = if zn > 1e-12 * scale {
                    (red.cons[p].rhs - np.dot(&w)) / zn
                } else {
                    f64::INFINITY
                };

                let t = t_dual.min(t_primal);
                if t.is_infinite() {
                    return (ActiveSetExit::Infeasible, w, active, u, iterations);
                }
                if t_primal.is_finite() {
                    w.axpy(t, &z, 1.0);
                }
                for (uk, rk) in u.iter_mut().zip(&r) {
                    *uk -= t * rk;
                }
                added += t;

                if t_primal <= t_dual {
                    active.push(p);
                    u.push(added);
                    in_active[p] = true;
                    break;
                }
                if let Some(k) = blocking {
                    in_active[active[k]] = false;
                    active.remove(k);
                    u.remove(k);
                }
                iterations += 1;
                if iterations > self.settings.max_iter {
                    return (ActiveSetExit::IterationLimit, w, active, u, iterations - 1);
                }
            }
        }
    }

    fn recover(&self, qp: &QpInstance, red: &Reduced, w: &DVector<f64>, active: &[usize], u: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n = qp.num_vars();
        let x = &red.x0 + &red.z * w;

        // Multipliers in the upper-minus-lower sign convention first
        let mut lmd = vec![0.0; n + qp.num_constraints()];
        let slot = |c: ConstraintRef| match c {
            ConstraintRef::Var(j, side) => (j, side),
            ConstraintRef::Row(i, side) => (n + i, side),
        };
        for (&j, &uj) in active.iter().zip(u) {
            let (idx, side) = slot(red.cons[j].source);
            lmd[idx] += if side == BoundSide::Upper { uj } else { -uj };
        }

        if !red.eq_rows.is_empty() {
            // Stationarity fixes the equality multipliers: A_eq^T y = -(P x + q + rest)
            let mut residual = DVector::from_vec(qp.cost_gradient(x.as_slice()));
            for j in 0..n {
                residual[j] += lmd[j];
            }
            for (i, row) in qp.a_rows().iter().enumerate() {
                for &(c, v) in row {
                    residual[c] += v * lmd[n + i];
                }
            }
            let a_eq_t = DMatrix::from_fn(n, red.eq_rows.len(), |r, c| red.eq_rows[c].0[r]);
            if let Ok(y_eq) = a_eq_t.svd(true, true).solve(&(-residual), 1e-12) {
                for (k, (_, source)) in red.eq_rows.iter().enumerate() {
                    let (idx, _) = slot(*source);
                    lmd[idx] = y_eq[k];
                }
            }
        }

        // The solver reports multipliers with the opposite sign
        let multipliers = lmd.iter().map(|v| -v).collect();
        (x.iter().copied().collect(), multipliers)
    }

    /// Solve `qp`, warm-starting from `warm` and updating it afterwards
    pub fn solve_with(&self, qp: &QpInstance, warm: &mut WarmStart) -> Result<ActiveSetSolution> {
        qp.validate()?;
        warm.solves += 1;
        let n = qp.num_vars();
        let failed = |exit: ActiveSetExit, warm_started: bool, cold_restart: bool| ActiveSetSolution {
            exit,
            x: vec![0.0; n],
            multipliers: vec![0.0; n + qp.num_constraints()],
            iterations: 0,
            warm_started,
            cold_restart,
        };

        let red = match self.reduce(qp) {
            Reduction::Ready(red) => red,
            Reduction::Failed(exit) => {
                warm.clear();
                return Ok(failed(exit, false, false));
            }
        };

        let index: BTreeMap<ConstraintRef, usize> = red.cons.iter().enumerate().map(|(i, c)| (c.source, i)).collect();
        let initial: Vec<usize> = if warm.matches(qp) {
            warm.working_set.iter().filter_map(|c| index.get(c).copied()).collect()
        } else {
            Vec::new()
        };
        let warm_started = !initial.is_empty();

        let (mut exit, mut w, mut active, mut u, mut iterations) = self.iterate(&red, initial);
        let mut cold_restart = false;
        if warm_started {
            let x = &red.x0 + &red.z * &w;
            let violation = qp.max_violation(x.as_slice());
            if exit != ActiveSetExit::Optimal || violation > self.settings.warm_start_tol {
                tracing::debug!(
                    "Active set: warm start unusable ({:?}, violation {:.2e}), cold restart",
                    exit,
                    violation
                );
                warm.cold_restarts += 1;
                cold_restart = true;
                let (e, w2, a2, u2, it2) = self.iterate(&red, Vec::new());
                exit = e;
                w = w2;
                active = a2;
                u = u2;
                iterations += it2;
            }
        }

        if exit != ActiveSetExit::Optimal {
            warm.clear();
            let mut out = failed(exit, warm_started, cold_restart);
            out.iterations = iterations;
            return Ok(out);
        }

        warm.store(qp, active.iter().map(|&j| red.cons[j].source).collect());
        let (x, multipliers) = self.recover(qp, &red, &w, &active, &u);
        Ok(ActiveSetSolution {
            exit,
            x,
            multipliers,
            iterations,
            warm_started,
            cold_restart,
        })
    }
}

/// Active-set backend owning one persistent warm-start handle
///
/// The handle follows the problem from solve to solve; build a fresh backend
/// for every unrelated problem.
pub struct ActiveSetBackend {
    solver: ActiveSetSolver,
    handle: WarmStart,
}

impl ActiveSetBackend {
    pub fn new() -> Self {
        Self::with_settings(ActiveSetSettings::default())
    }

    pub fn with_settings(settings: ActiveSetSettings) -> Self {
        ActiveSetBackend {
            solver: ActiveSetSolver::new(settings),
            handle: WarmStart::new(),
        }
    }

    pub fn warm_start(&self) -> &WarmStart {
        &self.handle
    }

    pub fn reset(&mut self) {
        self.handle.clear();
    }
}

impl Default for ActiveSetBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverBackend for ActiveSetBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve_once(&mut self, qp: &QpInstance) -> Result<SolveResult> {
        let sol = self.solver.solve_with(qp, &mut self.handle)?;
        let info = sol.exit.info();
        tracing::debug!(
            "Active set finished: info {} after {} iterations (warm {}, cold restart {})",
            info,
            sol.iterations,
            sol.warm_started,
            sol.cold_restart
        );
        if info != 1 {
            let mut res = SolveResult::failed(qp, NAME, info, sol.iterations);
            res.info.cold_restart = sol.cold_restart;
            return Ok(res);
        }

        let n = qp.num_vars();
        let lmdz = sol.multipliers[..n].iter().map(|v| -v).collect();
        let lmdy = sol.multipliers[n..].iter().map(|v| -v).collect();
        Ok(SolveResult {
            is_solved: true,
            objective: qp.objective(&sol.x),
            x: sol.x,
            lmdy,
            lmdz,
            info: SolveInfo {
                backend: NAME,
                status_code: info,
                iterations: sol.iterations,
                generation: qp.generation,
                polished: false,
                cold_restart: sol.cold_restart,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn box_qp(generation: u64, q: [f64; 2]) -> QpInstance {
        // min 0.5 |x|^2 + q.x s.t. x0 + x1 = 1.5, 0 <= x <= 1, x0 - x1 <= 0.2
        let mut p = TriMat::new((2, 2));
        p.add_triplet(0, 0, 1.0);
        p.add_triplet(1, 1, 1.0);
        let mut a = TriMat::new((2, 2));
        a.add_triplet(0, 0, 1.0);
        a.add_triplet(0, 1, 1.0);
        a.add_triplet(1, 0, 1.0);
        a.add_triplet(1, 1, -1.0);
        QpInstance::new(
            p.to_csc(),
            q.to_vec(),
            a.to_csc(),
            vec![1.5, f64::NEG_INFINITY],
            vec![1.5, 0.2],
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            generation,
        )
    }

    #[test]
    fn test_orthonormal_completion() {
        let rows = vec![DVector::from_vec(vec![1.0, 1.0, 0.0]), DVector::from_vec(vec![2.0, 2.0, 0.0])];
        let (basis, rank) = orthonormal_completion(&rows, 3);
        assert_eq!(rank, 1);
        assert_eq!(basis.len(), 3);
        for (i, a) in basis.iter().enumerate() {
            for (j, b) in basis.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((a.dot(b) - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_row_active_solution_and_duals() {
        let qp = box_qp(0, [-1.0, 0.0]);
        let mut backend = ActiveSetBackend::new();
        let res = backend.solve_once(&qp).unwrap();

        // Unconstrained along x0 + x1 = 1.5 the optimum is (1.25, 0.25), clipped by x0 - x1 <= 0.2
        assert!(res.is_solved);
        assert!((res.x[0] - 0.85).abs() < 1e-9, "x = {:?}", res.x);
        assert!((res.x[1] - 0.65).abs() < 1e-9);
        // Stationarity: P x + q + A^T lmdy + lmdz = 0
        let g0 = res.x[0] - 1.0 + res.lmdy[0] + res.lmdy[1] + res.lmdz[0];
        let g1 = res.x[1] + res.lmdy[0] - res.lmdy[1] + res.lmdz[1];
        assert!(g0.abs() < 1e-9 && g1.abs() < 1e-9);
        assert!(res.lmdy[1] > 0.0);
        assert_eq!(res.info.status_code, 1);
    }

    #[test]
    fn test_warm_start_reused_between_solves() {
        let mut backend = ActiveSetBackend::new();
        let first = backend.solve_once(&box_qp(0, [-1.0, 0.0])).unwrap();
        assert!(backend.warm_start().is_warm());
        assert!(!backend.warm_start().working_set().is_empty());

        let second = backend.solve_once(&box_qp(1, [-1.01, 0.0])).unwrap();
        assert!(second.is_solved);
        assert!(!second.info.cold_restart);
        assert_eq!(second.info.generation, 1);
        assert!((first.x[0] - second.x[0]).abs() < 0.05);
    }

    #[test]
    fn test_stale_warm_start_falls_back_to_cold() {
        let mut backend = ActiveSetBackend::new();
        backend.solve_once(&box_qp(0, [-1.0, 0.0])).unwrap();
        // Pull hard towards x1 so the stored working set becomes wrong
        let res = backend.solve_once(&box_qp(1, [3.0, -3.0])).unwrap();
        assert!(res.is_solved);
        let cold = ActiveSetBackend::new().solve_once(&box_qp(1, [3.0, -3.0])).unwrap();
        assert!((res.x[0] - 0.5).abs() < 1e-9, "x = {:?}", res.x);
        assert!((res.x[0] - cold.x[0]).abs() < 1e-9);
        assert!((res.x[1] - cold.x[1]).abs() < 1e-9);
    }

    #[test]
    fn test_infeasible_equalities() {
        let mut p = TriMat::new((1, 1));
        p.add_triplet(0, 0, 1.0);
        let mut a = TriMat::new((2, 1));
        a.add_triplet(0, 0, 1.0);
        a.add_triplet(1, 0, 1.0);
        let qp = QpInstance::new(
            p.to_csc(),
            vec![0.0],
            a.to_csc(),
            vec![1.0, 2.0],
            vec![1.0, 2.0],
            vec![-5.0],
            vec![5.0],
            0,
        );
        let mut backend = ActiveSetBackend::new();
        let res = backend.solve_once(&qp).unwrap();
        assert!(!res.is_solved);
        assert_eq!(res.info.status_code, 2);
        assert!(!backend.warm_start().is_warm());
    }

    #[test]
    fn test_infeasible_bounds_against_row() {
        let mut p = TriMat::new((2, 2));
        p.add_triplet(0, 0, 1.0);
        p.add_triplet(1, 1, 1.0);
        let mut a = TriMat::new((1, 2));
        a.add_triplet(0, 0, 1.0);
        a.add_triplet(0, 1, 1.0);
        let qp = QpInstance::new(
            p.to_csc(),
            vec![0.0, 0.0],
            a.to_csc(),
            vec![3.0],
            vec![4.0],
            vec![0.0, 0.0],
            vec![1.0, 1.0],
            0,
        );
        let res = ActiveSetBackend::new().solve_once(&qp).unwrap();
        assert!(!res.is_solved);
        assert_eq!(res.objective, f64::INFINITY);
    }
}
