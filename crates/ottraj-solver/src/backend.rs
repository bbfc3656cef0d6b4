use ottraj_types::Result;
use serde::{Deserialize, Serialize};

use crate::active_set_backend::ActiveSetBackend;
use crate::admm_backend::AdmmSolver;
use crate::interior_point_backend::InteriorPointSolver;
use crate::qp_instance::QpInstance;

/// Bookkeeping attached to every solve
#[derive(Debug, Clone, PartialEq)]
pub struct SolveInfo {
    pub backend: &'static str,
    /// Backend specific status code
    pub status_code: i32,
    pub iterations: usize,
    /// Generation of the instance that was solved
    pub generation: u64,
    /// ADMM only: the polished solution was accepted
    pub polished: bool,
    /// Active set only: the warm-started point was discarded for a cold start
    pub cold_restart: bool,
}

/// Solution of one QP solve
///
/// Dual vectors follow one convention for every backend: each entry is the
/// upper-bound multiplier minus the lower-bound multiplier, so a positive value
/// means the upper side of the row or bound is active.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub is_solved: bool,
    /// QP objective, `f64::INFINITY` when the solve failed
    pub objective: f64,
    pub x: Vec<f64>,
    /// Multipliers of the general constraint rows
    pub lmdy: Vec<f64>,
    /// Multipliers of the variable bounds
    pub lmdz: Vec<f64>,
    pub info: SolveInfo,
}

impl SolveResult {
    /// Result recorded when a backend reports failure
    pub fn failed(qp: &QpInstance, backend: &'static str, status_code: i32, iterations: usize) -> Self {
        SolveResult {
            is_solved: false,
            objective: f64::INFINITY,
            x: vec![0.0; qp.num_vars()],
            lmdy: vec![0.0; qp.num_constraints()],
            lmdz: vec![0.0; qp.num_vars()],
            info: SolveInfo {
                backend,
                status_code,
                iterations,
                generation: qp.generation,
                polished: false,
                cold_restart: false,
            },
        }
    }
}

/// Trait for QP solver backends
///
/// Infeasibility and solver breakdowns are reported through
/// `SolveResult::is_solved`; `Err` is reserved for malformed instances.
pub trait SolverBackend: Send {
    fn name(&self) -> &'static str;

    /// Solve a QP: minimize 0.5 * x^T P x + q^T x
    /// subject to clb <= A x <= cub, xlb <= x <= xub
    fn solve_once(&mut self, qp: &QpInstance) -> Result<SolveResult>;
}

/// Available backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    Admm,
    InteriorPoint,
    ActiveSet,
}

impl SolverKind {
    pub fn all() -> &'static [SolverKind] {
        &[SolverKind::Admm, SolverKind::InteriorPoint, SolverKind::ActiveSet]
    }

    /// Fresh backend with default settings
    ///
    /// Every call returns a new instance, so an active-set warm start never
    /// leaks between problems.
    pub fn build(self) -> Box<dyn SolverBackend> {
        match self {
            SolverKind::Admm => Box::new(AdmmSolver::new()),
            SolverKind::InteriorPoint => Box::new(InteriorPointSolver::new()),
            SolverKind::ActiveSet => Box::new(ActiveSetBackend::new()),
        }
    }
}
