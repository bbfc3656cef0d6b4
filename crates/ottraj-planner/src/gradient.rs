use ottraj_solver::{SolveResult, SolverBackend};
use ottraj_types::{PlannerError, Result, SPATIAL_DIMS};
use serde::{Deserialize, Serialize};

use crate::formulation::{build_instance, construct_constraints};
use crate::problem::TrajectoryProblem;

/// Default perturbation for the finite-difference methods
pub const DEFAULT_FD_STEP: f64 = 0.25e-6;

/// How the derivative of the objective with respect to the segment times is obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum GradientMethod {
    /// KKT sensitivity of the current solve, no extra solves
    #[default]
    Analytic,
    /// Perturb one segment time at a time
    ForwardDifference { step: f64 },
    /// Perturb one segment up and spread the opposite change over the others,
    /// keeping the total time fixed
    Balanced { step: f64 },
}

impl GradientMethod {
    pub fn forward_difference() -> Self {
        GradientMethod::ForwardDifference { step: DEFAULT_FD_STEP }
    }

    pub fn balanced() -> Self {
        GradientMethod::Balanced { step: DEFAULT_FD_STEP }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            GradientMethod::Analytic => Ok(()),
            GradientMethod::ForwardDifference { step } | GradientMethod::Balanced { step } => {
                if step.is_finite() && step > 0.0 {
                    Ok(())
                } else {
                    Err(PlannerError::ConfigError(format!("finite-difference step {} must be positive", step)))
                }
            }
        }
    }
}

/// Gradient together with the number of QP solves it cost
#[derive(Debug, Clone)]
pub struct GradientEstimate {
    pub gradient: Vec<f64>,
    pub solves: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GradientEngine {
    method: GradientMethod,
}

impl GradientEngine {
    pub fn new(method: GradientMethod) -> Self {
        GradientEngine { method }
    }

    pub fn method(&self) -> GradientMethod {
        self.method
    }

    /// d(objective)/d(room_time) at the problem's current times.
    ///
    /// `base` must be a successful solve of the problem at those times.
    pub fn gradient(
        &self,
        problem: &TrajectoryProblem,
        base: &SolveResult,
        backend: &mut dyn SolverBackend,
    ) -> Result<GradientEstimate> {
        if !base.is_solved {
            return Err(PlannerError::SolverError("gradient requested for a failed solve".into()));
        }
        if base.x.len() != problem.num_vars() {
            return Err(PlannerError::construction(format!(
                "solution has {} entries, problem has {} variables",
                base.x.len(),
                problem.num_vars()
            )));
        }
        match self.method {
            GradientMethod::Analytic => Ok(GradientEstimate {
                gradient: analytic_gradient(problem, base)?,
                solves: 0,
            }),
            GradientMethod::ForwardDifference { step } => finite_difference(problem, base, backend, step, false),
            GradientMethod::Balanced { step } => finite_difference(problem, base, backend, step, true),
        }
    }
}

fn analytic_gradient(problem: &TrajectoryProblem, base: &SolveResult) -> Result<Vec<f64>> {
    let times = problem.room_time();
    let config = problem.config();
    let np = config.points_per_axis();
    let seg_vars = problem.segment_vars();
    let mqm = problem.basis().mqm();
    let x = &base.x;

    let mut grad = vec![problem.time_weight(); problem.num_segments()];

    // Cost blocks scale as t^(3 - 2r)
    let r = config.minimize_order as i32;
    for (k, &t) in times.iter().enumerate() {
        let coef = 0.5 * (3 - 2 * r) as f64 * t.powi(2 - 2 * r);
        for dim in 0..SPATIAL_DIMS {
            let offset = problem.var_index(k, dim, 0);
            let block = &x[offset..offset + np];
            let mut quad = 0.0;
            for i in 0..np {
                for j in 0..np {
                    quad += block[i] * mqm[(i, j)] * block[j];
                }
            }
            grad[k] += coef * quad;
        }
    }

    // Row coefficients scale as t^e, so dA/dt = e / t * A on that segment's columns
    let cons = construct_constraints(problem.corridors(), times, problem.start(), problem.end(), config)?;
    for (&v, (row, col)) in cons.a.iter() {
        let e = cons.kinds[row].time_exponent();
        if e == 0 || base.lmdy[row] == 0.0 {
            continue;
        }
        let k = col / seg_vars;
        grad[k] += base.lmdy[row] * e as f64 / times[k] * v * x[col];
    }

    // Corridor bounds scale as 1/t
    for (j, &lmd) in base.lmdz.iter().enumerate() {
        if lmd == 0.0 {
            continue;
        }
        let k = j / seg_vars;
        let bound = if lmd > 0.0 { cons.xub[j] } else { cons.xlb[j] };
        grad[k] += lmd * bound / times[k];
    }

    Ok(grad)
}

fn finite_difference(
    problem: &TrajectoryProblem,
    base: &SolveResult,
    backend: &mut dyn SolverBackend,
    step: f64,
    balanced: bool,
) -> Result<GradientEstimate> {
    let times = problem.room_time();
    let n = times.len();
    let weight = problem.time_weight();
    let mut gradient = Vec::with_capacity(n);
    let mut solves = 0;

    for i in 0..n {
        let mut perturbed = times.to_vec();
        if balanced && n > 1 {
            let share = step / (n - 1) as f64;
            for t in perturbed.iter_mut() {
                *t -= share;
            }
            perturbed[i] += share;
        }
        perturbed[i] += step;

        let qp = build_instance(problem, &perturbed, problem.generation())?;
        let res = backend.solve_once(&qp)?;
        solves += 1;
        if !res.is_solved {
            return Err(PlannerError::SolverError(format!(
                "perturbed solve for segment {} failed with status {}",
                i, res.info.status_code
            )));
        }
        gradient.push((res.objective - base.objective) / step + weight);
    }

    tracing::debug!("Finite-difference gradient used {} solves", solves);
    Ok(GradientEstimate { gradient, solves })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_serde() {
        let json = serde_json::to_string(&GradientMethod::balanced()).unwrap();
        assert_eq!(json, r#"{"method":"balanced","step":2.5e-7}"#);
        let parsed: GradientMethod = serde_json::from_str(r#"{"method":"analytic"}"#).unwrap();
        assert_eq!(parsed, GradientMethod::Analytic);
    }

    #[test]
    fn test_rejects_bad_step() {
        assert!(GradientMethod::ForwardDifference { step: 0.0 }.validate().is_err());
        assert!(GradientMethod::Balanced { step: f64::NAN }.validate().is_err());
        assert!(GradientMethod::forward_difference().validate().is_ok());
    }
}
