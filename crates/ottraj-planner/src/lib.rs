mod problem;
mod formulation;
mod gradient;
mod optimizer;
mod output;

pub use problem::{ProblemFile, TrajectoryProblem};
pub use formulation::{
    build_instance, construct_constraints, construct_cost, CostTriangle, LinearConstraints, RowKind,
};
pub use gradient::{GradientEngine, GradientEstimate, GradientMethod, DEFAULT_FD_STEP};
pub use optimizer::{
    clamp_step, project_total_time, ConvergenceReason, InverseHessian, IterationTiming, RefineConfig, RefineOutcome,
    RefineStatus, TimeAllocationOptimizer,
};
pub use output::{coefficients_to_solution, eval_cost_constr, solution_from_coef_matrix, ConstraintReport, OutputExtractor};
