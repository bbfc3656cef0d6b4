use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT};
use ottraj_types::Result;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::backend::{SolveInfo, SolveResult, SolverBackend};
use crate::qp_instance::QpInstance;

const NAME: &str = "interior-point";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteriorPointSettings {
    pub max_iter: u32,
    pub tol_gap_abs: f64,
    pub tol_gap_rel: f64,
    pub verbose: bool,
}

impl Default for InteriorPointSettings {
    fn default() -> Self {
        InteriorPointSettings {
            max_iter: 200,
            tol_gap_abs: 1e-8,
            tol_gap_rel: 1e-8,
            verbose: false,
        }
    }
}

/// Clarabel-based QP solver (pure Rust interior point)
pub struct InteriorPointSolver {
    settings: InteriorPointSettings,
}

impl InteriorPointSolver {
    pub fn new() -> Self {
        InteriorPointSolver {
            settings: InteriorPointSettings::default(),
        }
    }

    pub fn with_settings(settings: InteriorPointSettings) -> Self {
        InteriorPointSolver { settings }
    }
}

impl Default for InteriorPointSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a conic row's dual goes
#[derive(Debug, Clone, Copy)]
enum DualTarget {
    Row(usize),
    Var(usize),
}

/// Conic rows `A_ext x + s = b`: equalities first (zero cone), then one
/// nonnegative row per finite side of every remaining row or bound.
struct ConicForm {
    a: CscMatrix<f64>,
    b: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
    /// (target, sign) so that lmd[target] += sign * z
    duals: Vec<(DualTarget, f64)>,
}

fn conic_form(qp: &QpInstance) -> ConicForm {
    let n = qp.num_vars();
    let rows = qp.a_rows();

    // (entries, rhs, target, sign)
    let mut eq = Vec::new();
    let mut ineq = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let target = DualTarget::Row(i);
        if qp.is_equality_row(i) {
            eq.push((row.clone(), qp.cub[i], target, 1.0));
            continue;
        }
        if qp.cub[i].is_finite() {
            ineq.push((row.clone(), qp.cub[i], target, 1.0));
        }
        if qp.clb[i].is_finite() {
            let neg: Vec<(usize, f64)> = row.iter().map(|&(c, v)| (c, -v)).collect();
            ineq.push((neg, -qp.clb[i], target, -1.0));
        }
    }
    for j in 0..n {
        let target = DualTarget::Var(j);
        if qp.is_fixed_var(j) {
            eq.push((vec![(j, 1.0)], qp.xub[j], target, 1.0));
            continue;
        }
        if qp.xub[j].is_finite() {
            ineq.push((vec![(j, 1.0)], qp.xub[j], target, 1.0));
        }
        if qp.xlb[j].is_finite() {
            ineq.push((vec![(j, -1.0)], -qp.xlb[j], target, -1.0));
        }
    }

    let n_eq = eq.len();
    let n_ineq = ineq.len();
    let mut tri = TriMat::new((n_eq + n_ineq, n));
    let mut b = Vec::with_capacity(n_eq + n_ineq);
    let mut duals = Vec::with_capacity(n_eq + n_ineq);
    for (r, (entries, rhs, target, sign)) in eq.into_iter().chain(ineq).enumerate() {
        for (c, v) in entries {
            tri.add_triplet(r, c, v);
        }
        b.push(rhs);
        duals.push((target, sign));
    }

    let mut cones = Vec::new();
    if n_eq > 0 {
        cones.push(SupportedConeT::ZeroConeT(n_eq));
    }
    if n_ineq > 0 {
        cones.push(SupportedConeT::NonnegativeConeT(n_ineq));
    }

    ConicForm {
        a: to_clarabel_csc(&tri.to_csc()),
        b,
        cones,
        duals,
    }
}

/// Convert a sprs matrix to Clarabel CSC format
fn to_clarabel_csc(mat: &CsMat<f64>) -> CscMatrix<f64> {
    let csc = if mat.is_csc() { mat.clone() } else { mat.to_csc() };
    CscMatrix {
        m: csc.rows(),
        n: csc.cols(),
        colptr: csc.indptr().raw_storage().to_vec(),
        rowval: csc.indices().to_vec(),
        nzval: csc.data().to_vec(),
    }
}

/// Upper triangle of P, as Clarabel requires
fn upper_triangle(p: &CsMat<f64>) -> CsMat<f64> {
    let mut tri = TriMat::new((p.rows(), p.cols()));
    for (&v, (r, c)) in p.iter() {
        if r <= c {
            tri.add_triplet(r, c, v);
        }
    }
    tri.to_csc()
}

fn status_code(status: SolverStatus) -> i32 {
    match status {
        SolverStatus::Solved => 1,
        SolverStatus::AlmostSolved => 2,
        SolverStatus::MaxIterations => -2,
        SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => -3,
        SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => -4,
        _ => -10,
    }
}

impl SolverBackend for InteriorPointSolver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve_once(&mut self, qp: &QpInstance) -> Result<SolveResult> {
        qp.validate()?;
        let n = qp.num_vars();
        let conic = conic_form(qp);
        let p_csc = to_clarabel_csc(&upper_triangle(&qp.p));

        let mut settings = DefaultSettings::default();
        settings.verbose = self.settings.verbose;
        settings.max_iter = self.settings.max_iter;
        settings.tol_gap_abs = self.settings.tol_gap_abs;
        settings.tol_gap_rel = self.settings.tol_gap_rel;

        let mut solver = DefaultSolver::new(&p_csc, &qp.q, &conic.a, &conic.b, &conic.cones, settings);
        solver.solve();

        let status = solver.solution.status;
        let code = status_code(status);
        let iterations = solver.info.iterations as usize;
        tracing::debug!("Interior point finished: {:?} after {} iterations", status, iterations);
        if code <= 0 {
            return Ok(SolveResult::failed(qp, NAME, code, iterations));
        }

        let mut lmdy = vec![0.0; qp.num_constraints()];
        let mut lmdz = vec![0.0; n];
        for (&(target, sign), z) in conic.duals.iter().zip(solver.solution.z.iter()) {
            match target {
                DualTarget::Row(i) => lmdy[i] += sign * z,
                DualTarget::Var(j) => lmdz[j] += sign * z,
            }
        }

        let x = solver.solution.x.clone();
        Ok(SolveResult {
            is_solved: true,
            objective: qp.objective(&x),
            x,
            lmdy,
            lmdz,
            info: SolveInfo {
                backend: NAME,
                status_code: code,
                iterations,
                generation: qp.generation,
                polished: false,
                cold_restart: false,
            },
        })
    }
}
