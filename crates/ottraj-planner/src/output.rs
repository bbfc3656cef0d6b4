use ndarray::{Array2, Array3};
use ottraj_basis::eval_monomial_derivative;
use ottraj_solver::SolveResult;
use ottraj_types::{PlannerError, Result, SPATIAL_DIMS};

use crate::formulation::{construct_constraints, construct_cost, CostTriangle, RowKind};
use crate::problem::TrajectoryProblem;

/// Monomial coefficients and sampling of a solved trajectory
///
/// Coefficients are indexed `[segment, power, axis]` and describe each
/// segment on its normalized parameter `s` in [0, 1].
#[derive(Debug, Clone)]
pub struct OutputExtractor {
    room_time: Vec<f64>,
    coefficients: Array3<f64>,
    control_points: Array3<f64>,
}

fn check_shape(problem: &TrajectoryProblem, tensor: &Array3<f64>) -> Result<()> {
    let expected = (problem.num_segments(), problem.config().points_per_axis(), SPATIAL_DIMS);
    if tensor.dim() != expected {
        return Err(PlannerError::construction(format!(
            "coefficient tensor has shape {:?}, expected {:?}",
            tensor.dim(),
            expected
        )));
    }
    Ok(())
}

impl OutputExtractor {
    /// Build from a raw solution vector laid out like the QP variables
    pub fn new(problem: &TrajectoryProblem, x: &[f64]) -> Result<Self> {
        if x.len() != problem.num_vars() {
            return Err(PlannerError::construction(format!(
                "solution has {} entries, expected {}",
                x.len(),
                problem.num_vars()
            )));
        }
        let n = problem.num_segments();
        let np = problem.config().points_per_axis();
        let m = problem.basis().m();
        let times = problem.room_time();

        let mut control_points = Array3::zeros((n, np, SPATIAL_DIMS));
        let mut coefficients = Array3::zeros((n, np, SPATIAL_DIMS));
        for (k, &t) in times.iter().enumerate() {
            for dim in 0..SPATIAL_DIMS {
                let offset = problem.var_index(k, dim, 0);
                for i in 0..np {
                    control_points[[k, i, dim]] = x[offset + i] * t;
                    coefficients[[k, i, dim]] = (0..np).map(|j| m[(i, j)] * x[offset + j]).sum::<f64>() * t;
                }
            }
        }
        Ok(OutputExtractor {
            room_time: times.to_vec(),
            coefficients,
            control_points,
        })
    }

    pub fn from_solution(problem: &TrajectoryProblem, solution: &SolveResult) -> Result<Self> {
        if !solution.is_solved {
            return Err(PlannerError::SolverError("cannot extract a failed solve".into()));
        }
        Self::new(problem, &solution.x)
    }

    pub fn room_time(&self) -> &[f64] {
        &self.room_time
    }

    pub fn total_time(&self) -> f64 {
        self.room_time.iter().sum()
    }

    /// Room times and monomial coefficients
    pub fn coefficients(&self) -> (Vec<f64>, Array3<f64>) {
        (self.room_time.clone(), self.coefficients.clone())
    }

    /// Bezier control points in true scale
    pub fn coef_matrix(&self) -> Array3<f64> {
        self.control_points.clone()
    }

    /// Segment owning global time `time` and the normalized parameter inside it
    pub fn locate(&self, time: f64) -> (usize, f64) {
        let time = time.clamp(0.0, self.total_time());
        let last = self.room_time.len() - 1;
        let mut begin = 0.0;
        for (k, &t) in self.room_time.iter().enumerate() {
            if time <= begin + t || k == last {
                return (k, ((time - begin) / t).clamp(0.0, 1.0));
            }
            begin += t;
        }
        (last, 1.0)
    }

    /// Position (0), velocity (1), acceleration (2), ... at global time `time`
    pub fn evaluate(&self, time: f64, derivative: usize) -> [f64; 3] {
        let (k, s) = self.locate(time);
        let scale = self.room_time[k].powi(-(derivative as i32));
        let mut out = [0.0; 3];
        for (dim, value) in out.iter_mut().enumerate() {
            let coeffs: Vec<f64> = self.coefficients.slice(ndarray::s![k, .., dim]).to_vec();
            *value = eval_monomial_derivative(&coeffs, s, derivative) * scale;
        }
        out
    }

    /// `n_samples` positions evenly spaced over the whole duration
    pub fn path(&self, n_samples: usize) -> (f64, Array2<f64>) {
        let total = self.total_time();
        let mut path = Array2::zeros((n_samples, SPATIAL_DIMS));
        for i in 0..n_samples {
            let time = if n_samples > 1 {
                total * i as f64 / (n_samples - 1) as f64
            } else {
                0.0
            };
            let point = self.evaluate(time, 0);
            for dim in 0..SPATIAL_DIMS {
                path[[i, dim]] = point[dim];
            }
        }
        (total, path)
    }
}

/// Raw solution vector for true-scale Bezier control points
pub fn solution_from_coef_matrix(problem: &TrajectoryProblem, coef: &Array3<f64>) -> Result<Vec<f64>> {
    check_shape(problem, coef)?;
    let np = problem.config().points_per_axis();
    let mut x = vec![0.0; problem.num_vars()];
    for (k, &t) in problem.room_time().iter().enumerate() {
        for dim in 0..SPATIAL_DIMS {
            for j in 0..np {
                x[problem.var_index(k, dim, j)] = coef[[k, j, dim]] / t;
            }
        }
    }
    Ok(x)
}

/// Raw solution vector for monomial coefficients, inverting the output transform
pub fn coefficients_to_solution(problem: &TrajectoryProblem, poly: &Array3<f64>) -> Result<Vec<f64>> {
    check_shape(problem, poly)?;
    let np = problem.config().points_per_axis();
    let m_inv = problem.basis().m_inverse();
    let mut x = vec![0.0; problem.num_vars()];
    for (k, &t) in problem.room_time().iter().enumerate() {
        for dim in 0..SPATIAL_DIMS {
            for j in 0..np {
                let b: f64 = (0..np).map(|i| m_inv[(j, i)] * poly[[k, i, dim]]).sum();
                x[problem.var_index(k, dim, j)] = b / t;
            }
        }
    }
    Ok(x)
}

/// Cost and worst constraint violations of a set of control points
#[derive(Debug, Clone)]
pub struct ConstraintReport {
    /// QP cost plus time cost
    pub cost: f64,
    pub max_row_violation: f64,
    pub worst_row: Option<(usize, RowKind)>,
    pub max_bound_violation: f64,
    pub worst_bound: Option<usize>,
}

impl ConstraintReport {
    pub fn is_feasible(&self, tol: f64) -> bool {
        self.max_row_violation <= tol && self.max_bound_violation <= tol
    }
}

/// Evaluate true-scale control points against the problem at its current times
pub fn eval_cost_constr(problem: &TrajectoryProblem, coef: &Array3<f64>) -> Result<ConstraintReport> {
    let x = solution_from_coef_matrix(problem, coef)?;
    let config = problem.config();
    let times = problem.room_time();
    let (p, _) = construct_cost(
        config.minimize_order,
        problem.num_segments(),
        config.poly_order,
        times,
        problem.basis().mqm(),
        CostTriangle::Full,
    )?;
    let cost = 0.5 * p.iter().map(|(&v, (r, c))| v * x[r] * x[c]).sum::<f64>() + problem.time_cost(times);

    let cons = construct_constraints(problem.corridors(), times, problem.start(), problem.end(), config)?;
    let mut values = vec![0.0; cons.num_rows()];
    for (&v, (r, c)) in cons.a.iter() {
        values[r] += v * x[c];
    }

    let mut report = ConstraintReport {
        cost,
        max_row_violation: 0.0,
        worst_row: None,
        max_bound_violation: 0.0,
        worst_bound: None,
    };
    for (i, &v) in values.iter().enumerate() {
        let viol = (cons.clb[i] - v).max(v - cons.cub[i]);
        if viol > report.max_row_violation {
            report.max_row_violation = viol;
            report.worst_row = Some((i, cons.kinds[i]));
        }
    }
    for (j, &v) in x.iter().enumerate() {
        let viol = (cons.xlb[j] - v).max(v - cons.xub[j]);
        if viol > report.max_bound_violation {
            report.max_bound_violation = viol;
            report.worst_bound = Some(j);
        }
    }
    Ok(report)
}
