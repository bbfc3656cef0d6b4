mod qp_instance;
mod backend;
mod admm_backend;
mod interior_point_backend;
mod active_set_backend;

pub use qp_instance::QpInstance;
pub use backend::{SolveInfo, SolveResult, SolverBackend, SolverKind};
pub use admm_backend::{AdmmSettings, AdmmSolver, AdmmStatus};
pub use interior_point_backend::{InteriorPointSettings, InteriorPointSolver};
pub use active_set_backend::{
    ActiveSetBackend, ActiveSetExit, ActiveSetSettings, ActiveSetSolution, ActiveSetSolver, BoundSide,
    ConstraintRef, WarmStart,
};

#[cfg(test)]
mod tests;
