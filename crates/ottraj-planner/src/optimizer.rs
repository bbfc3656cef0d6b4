use std::fmt;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, Array3};
use ottraj_solver::{SolveResult, SolverBackend, SolverKind};
use ottraj_types::{PlannerError, Result};
use serde::{Deserialize, Serialize};

use crate::formulation::build_instance;
use crate::gradient::{GradientEngine, GradientMethod};
use crate::output::{self, ConstraintReport, OutputExtractor};
use crate::problem::TrajectoryProblem;

/// Smallest segment time a line-search candidate may have
const MIN_ROOM_TIME: f64 = 1e-6;
/// Kept between the clamped step and the positivity boundary
const STEP_MARGIN: f64 = 1e-6;
/// Adaptive mode gives up on steps shorter than this
const MIN_ADAPTIVE_ALPHA: f64 = 1e-4;
const ADAPTIVE_GROWTH: f64 = 1.5;
/// A candidate that removes this fraction of the objective is always accepted
const SUFFICIENT_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    pub gradient: GradientMethod,
    /// Initial step length
    pub alpha0: f64,
    /// Armijo constant in (0, 1)
    pub c: f64,
    /// Backtracking factor in (0, 1)
    pub tau: f64,
    pub max_iter: usize,
    pub max_line_search_trials: usize,
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub grad_tol: f64,
    pub adaptive_line_search: bool,
    /// Keep the total time fixed when there is no time weight
    pub project_total_time: bool,
    pub bfgs: bool,
    /// Scale of the initial inverse Hessian
    pub bfgs_beta: f64,
    pub record_log: bool,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            gradient: GradientMethod::Analytic,
            alpha0: 0.175,
            c: 0.2,
            tau: 0.2,
            max_iter: 50,
            max_line_search_trials: 5,
            abs_tol: 1e-3,
            rel_tol: 1e-3,
            grad_tol: 1e-3,
            adaptive_line_search: false,
            project_total_time: true,
            bfgs: false,
            bfgs_beta: 0.5,
            record_log: false,
        }
    }
}

impl RefineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.c > 0.0 && self.c < 1.0) {
            return Err(PlannerError::ConfigError(format!("Armijo constant {} outside (0, 1)", self.c)));
        }
        if !(self.tau > 0.0 && self.tau < 1.0) {
            return Err(PlannerError::ConfigError(format!("backtracking factor {} outside (0, 1)", self.tau)));
        }
        if !(self.alpha0.is_finite() && self.alpha0 > 0.0) {
            return Err(PlannerError::ConfigError(format!("initial step {} must be positive", self.alpha0)));
        }
        if self.max_line_search_trials == 0 {
            return Err(PlannerError::ConfigError("at least one line-search trial is required".into()));
        }
        if !(self.bfgs_beta.is_finite() && self.bfgs_beta > 0.0) {
            return Err(PlannerError::ConfigError(format!("BFGS scale {} must be positive", self.bfgs_beta)));
        }
        for (name, tol) in [("abs_tol", self.abs_tol), ("rel_tol", self.rel_tol), ("grad_tol", self.grad_tol)] {
            if !(tol >= 0.0) {
                return Err(PlannerError::ConfigError(format!("{} must be non-negative", name)));
            }
        }
        self.gradient.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceReason {
    NoNeedToRefine,
    SmallGradient,
    AbsoluteCost,
    RelativeCost,
}

impl ConvergenceReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConvergenceReason::NoNeedToRefine => "No need to refine",
            ConvergenceReason::SmallGradient => "Small gradient",
            ConvergenceReason::AbsoluteCost => "Absolute cost",
            ConvergenceReason::RelativeCost => "Relative cost",
        }
    }
}

impl fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefineStatus {
    Running,
    Converged(ConvergenceReason),
    StepSizeFailure,
    /// A solve needed by the gradient failed; the last accepted state is kept
    GradientFailure,
    MaxIterReached,
}

impl RefineStatus {
    pub fn reason(&self) -> String {
        match self {
            RefineStatus::Running => "Running".to_string(),
            RefineStatus::Converged(reason) => reason.to_string(),
            RefineStatus::StepSizeFailure => "Cannot find step size alpha".to_string(),
            RefineStatus::GradientFailure => "Gradient solve failed".to_string(),
            RefineStatus::MaxIterReached => "Maximum iterations reached".to_string(),
        }
    }
}

/// Wall time spent in the two stages of one outer iteration
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IterationTiming {
    pub gradient: Duration,
    /// Zero when the iteration stopped before searching
    pub line_search: Duration,
}

/// Final state of one `refine` call
#[derive(Debug, Clone)]
pub struct RefineOutcome {
    pub room_time: Vec<f64>,
    pub objective: f64,
    pub status: RefineStatus,
    pub converged: bool,
    pub reason: String,
    pub iterations: usize,
    pub solves: usize,
    pub elapsed: Duration,
    /// (objective, seconds since start) per accepted or rolled-back iteration
    pub log: Vec<(f64, f64)>,
    pub timings: Vec<IterationTiming>,
}

/// Step length for direction `p` from `times`, pulled back so every time stays positive
pub fn clamp_step(alpha0: f64, times: &[f64], p: &[f64]) -> f64 {
    let alpha_max = times
        .iter()
        .zip(p)
        .filter(|(_, &pi)| pi < 0.0)
        .map(|(&t, &pi)| -t / pi)
        .fold(f64::INFINITY, f64::min)
        - STEP_MARGIN;
    if alpha_max > 0.0 {
        alpha0.min(alpha_max)
    } else {
        alpha0
    }
}

/// Remove the component along the all-ones direction, so steps preserve the total time
pub fn project_total_time(g: &mut [f64]) {
    if g.is_empty() {
        return;
    }
    let mean = g.iter().sum::<f64>() / g.len() as f64;
    for v in g.iter_mut() {
        *v -= mean;
    }
}

/// Inverse Hessian approximation for the BFGS direction
#[derive(Debug, Clone)]
pub struct InverseHessian {
    h: DMatrix<f64>,
}

impl InverseHessian {
    pub fn new(n: usize, beta: f64) -> Self {
        InverseHessian {
            h: DMatrix::identity(n, n) * beta,
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.h
    }

    /// Two-sided rank-two update; skipped when the curvature condition fails
    pub fn update(&mut self, s: &[f64], y: &[f64]) -> bool {
        let s = DVector::from_column_slice(s);
        let y = DVector::from_column_slice(y);
        let ys = y.dot(&s);
        if ys <= 1e-12 {
            return false;
        }
        let rho = 1.0 / ys;
        let n = s.len();
        let left = DMatrix::identity(n, n) - (&s * y.transpose()) * rho;
        let right = DMatrix::identity(n, n) - (&y * s.transpose()) * rho;
        self.h = &left * &self.h * &right + (&s * s.transpose()) * rho;
        true
    }

    pub fn apply(&self, g: &[f64]) -> Vec<f64> {
        (&self.h * DVector::from_column_slice(g)).iter().copied().collect()
    }
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Accepted state an outer iteration can fall back to
struct Checkpoint {
    room_time: Vec<f64>,
    objective: f64,
    solution: Option<SolveResult>,
}

/// Drives the time allocation of one problem with one solver backend
pub struct TimeAllocationOptimizer {
    problem: TrajectoryProblem,
    backend: Box<dyn SolverBackend>,
    config: RefineConfig,
    engine: GradientEngine,
    solution: Option<SolveResult>,
    objective: f64,
}

impl TimeAllocationOptimizer {
    pub fn new(problem: TrajectoryProblem, backend: Box<dyn SolverBackend>, config: RefineConfig) -> Result<Self> {
        config.validate()?;
        Ok(TimeAllocationOptimizer {
            problem,
            backend,
            engine: GradientEngine::new(config.gradient),
            config,
            solution: None,
            objective: f64::INFINITY,
        })
    }

    /// Optimizer with a fresh backend of the given kind
    pub fn with_solver(problem: TrajectoryProblem, kind: SolverKind, config: RefineConfig) -> Result<Self> {
        Self::new(problem, kind.build(), config)
    }

    pub fn problem(&self) -> &TrajectoryProblem {
        &self.problem
    }

    pub fn into_problem(self) -> TrajectoryProblem {
        self.problem
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn solution(&self) -> Option<&SolveResult> {
        self.solution.as_ref()
    }

    /// Objective of the last accepted solve including the time cost
    pub fn objective(&self) -> f64 {
        self.objective
    }

    fn has_current_solution(&self) -> bool {
        self.solution
            .as_ref()
            .map_or(false, |s| s.is_solved && s.info.generation == self.problem.generation())
    }

    fn evaluate(&mut self, times: &[f64], generation: u64) -> Result<(SolveResult, f64)> {
        let qp = build_instance(&self.problem, times, generation)?;
        let res = self.backend.solve_once(&qp)?;
        tracing::debug!(
            "{} solve: status {} after {} iterations",
            res.info.backend,
            res.info.status_code,
            res.info.iterations
        );
        let objective = if res.is_solved {
            res.objective + self.problem.time_cost(times)
        } else {
            f64::INFINITY
        };
        Ok((res, objective))
    }

    /// Solve at the current room times and keep the result
    pub fn solve_once(&mut self) -> Result<bool> {
        let times = self.problem.room_time().to_vec();
        let (res, objective) = self.evaluate(&times, self.problem.generation())?;
        let solved = res.is_solved;
        self.objective = objective;
        self.solution = Some(res);
        Ok(solved)
    }

    /// Push a new time allocation into the problem and solve once
    pub fn solve_with_room_time(&mut self, times: &[f64]) -> Result<bool> {
        self.problem.set_room_time(times)?;
        self.solve_once()
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            room_time: self.problem.room_time().to_vec(),
            objective: self.objective,
            solution: self.solution.clone(),
        }
    }

    fn rollback(&mut self, cp: Checkpoint) -> Result<()> {
        if self.problem.room_time() != cp.room_time.as_slice() {
            self.problem.set_room_time(&cp.room_time)?;
        }
        self.objective = cp.objective;
        self.solution = cp.solution.map(|mut s| {
            s.info.generation = self.problem.generation();
            s
        });
        Ok(())
    }

    fn outcome(
        &self,
        status: RefineStatus,
        iterations: usize,
        solves: usize,
        started: Instant,
        log: Vec<(f64, f64)>,
        timings: Vec<IterationTiming>,
    ) -> RefineOutcome {
        RefineOutcome {
            room_time: self.problem.room_time().to_vec(),
            objective: self.objective,
            status,
            converged: matches!(status, RefineStatus::Converged(_)),
            reason: status.reason(),
            iterations,
            solves,
            elapsed: started.elapsed(),
            log,
            timings,
        }
    }

    /// Refine the time allocation until convergence, step-size failure or the iteration cap
    ///
    /// A failed line search leaves the problem exactly as it was before that
    /// iteration started and is reported through the outcome, not as an error.
    /// So is a failed solve during the gradient stage.
    pub fn refine(&mut self) -> Result<RefineOutcome> {
        let started = Instant::now();
        let n = self.problem.num_segments();
        let weight = self.problem.time_weight();

        if n == 1 && weight == 0.0 {
            tracing::info!("Single segment without time weight, no need to refine");
            return Ok(self.outcome(
                RefineStatus::Converged(ConvergenceReason::NoNeedToRefine),
                0,
                0,
                started,
                Vec::new(),
                Vec::new(),
            ));
        }

        let mut solves = 0;
        if !self.has_current_solution() {
            solves += 1;
            if !self.solve_once()? {
                return Err(PlannerError::Infeasible(format!(
                    "initial solve failed with {} status {}",
                    self.backend.name(),
                    self.solution.as_ref().map_or(0, |s| s.info.status_code)
                )));
            }
        }

        tracing::info!(
            "Refining {} segments with {} ({:?} gradient), initial objective {:.6}",
            n,
            self.backend.name(),
            self.config.gradient,
            self.objective
        );

        let mut log = Vec::new();
        let mut timings = Vec::new();
        if self.config.record_log {
            log.push((self.objective, started.elapsed().as_secs_f64()));
        }

        let project = weight == 0.0 && self.config.project_total_time;
        let mut alpha0 = self.config.alpha0;
        let mut hessian = self.config.bfgs.then(|| InverseHessian::new(n, self.config.bfgs_beta));
        let mut previous: Option<(Vec<f64>, Vec<f64>)> = None;
        let mut status = RefineStatus::Running;
        let mut iterations = 0;

        while iterations < self.config.max_iter {
            iterations += 1;

            let base = match self.solution.as_ref() {
                Some(s) => s,
                None => return Err(PlannerError::SolverError("no accepted solve to refine from".into())),
            };
            let gradient_started = Instant::now();
            let estimate = match self.engine.gradient(&self.problem, base, self.backend.as_mut()) {
                Ok(estimate) => estimate,
                Err(PlannerError::SolverError(msg)) => {
                    tracing::warn!("Gradient failed at iteration {}: {}", iterations, msg);
                    timings.push(IterationTiming {
                        gradient: gradient_started.elapsed(),
                        line_search: Duration::ZERO,
                    });
                    status = RefineStatus::GradientFailure;
                    break;
                }
                Err(e) => return Err(e),
            };
            let mut timing = IterationTiming {
                gradient: gradient_started.elapsed(),
                line_search: Duration::ZERO,
            };
            solves += estimate.solves;
            let mut g = estimate.gradient;
            if project {
                project_total_time(&mut g);
            }
            let gnorm = norm(&g);
            tracing::debug!("Iteration {}: gradient norm {:.3e}", iterations, gnorm);
            if gnorm < self.config.grad_tol {
                timings.push(timing);
                status = RefineStatus::Converged(ConvergenceReason::SmallGradient);
                break;
            }

            if let (Some(h), Some((g_prev, s))) = (hessian.as_mut(), previous.take()) {
                let y: Vec<f64> = g.iter().zip(&g_prev).map(|(a, b)| a - b).collect();
                if !h.update(&s, &y) {
                    tracing::debug!("Skipping BFGS update without positive curvature");
                }
            }
            let d = match hessian.as_ref() {
                Some(h) => h.apply(&g),
                None => g.clone(),
            };

            // p = d / m with m = -|d| points downhill; thr = -c m is the matching Armijo slope
            let m = -norm(&d);
            if m == 0.0 {
                timings.push(timing);
                status = RefineStatus::Converged(ConvergenceReason::SmallGradient);
                break;
            }
            let p: Vec<f64> = d.iter().map(|v| v / m).collect();
            let thr = -self.config.c * m;

            let search_started = Instant::now();
            let times = self.problem.room_time().to_vec();
            let obj0 = self.objective;
            let checkpoint = self.checkpoint();
            let candidate_generation = self.problem.generation() + 1;
            let mut alpha = clamp_step(alpha0, &times, &p);
            let mut accepted = None;

            for trial in 0..self.config.max_line_search_trials {
                if self.config.adaptive_line_search && alpha < MIN_ADAPTIVE_ALPHA {
                    break;
                }
                let candidate: Vec<f64> = times.iter().zip(&p).map(|(t, pi)| t + alpha * pi).collect();
                if candidate.iter().any(|&t| t < MIN_ROOM_TIME) {
                    alpha *= self.config.tau;
                    continue;
                }

                let (res, objective) = self.evaluate(&candidate, candidate_generation)?;
                solves += 1;
                if !res.is_solved {
                    tracing::debug!("Trial {} failed to solve, shrinking step {:.3e}", trial, alpha);
                    alpha *= self.config.tau;
                    continue;
                }
                if res.objective < 0.0 {
                    tracing::warn!("Negative objective {:.3e} from {}, treating as failed", res.objective, res.info.backend);
                    alpha *= self.config.tau;
                    continue;
                }

                let decrease = obj0 - objective;
                if decrease >= alpha * thr || decrease >= SUFFICIENT_FRACTION * obj0 {
                    accepted = Some((candidate, res, objective, trial));
                    break;
                }
                alpha *= self.config.tau;
            }

            timing.line_search = search_started.elapsed();
            timings.push(timing);
            let (candidate, res, objective, trial) = match accepted {
                Some(a) => a,
                None => {
                    tracing::warn!("Line search exhausted at iteration {}, rolling back", iterations);
                    self.rollback(checkpoint)?;
                    if self.config.record_log {
                        log.push((self.objective, started.elapsed().as_secs_f64()));
                    }
                    status = RefineStatus::StepSizeFailure;
                    break;
                }
            };

            if self.config.adaptive_line_search {
                alpha0 = if trial == 0 { ADAPTIVE_GROWTH * alpha } else { alpha };
            }
            self.problem.set_room_time(&candidate)?;
            self.solution = Some(res);
            self.objective = objective;
            if hessian.is_some() {
                previous = Some((g, p.iter().map(|v| alpha * v).collect()));
            }
            if self.config.record_log {
                log.push((objective, started.elapsed().as_secs_f64()));
            }
            tracing::debug!("Iteration {}: step {:.3e}, objective {:.6}", iterations, alpha, objective);

            let change = (objective - obj0).abs();
            if change < self.config.abs_tol {
                status = RefineStatus::Converged(ConvergenceReason::AbsoluteCost);
                break;
            }
            if change / obj0.abs() < self.config.rel_tol {
                status = RefineStatus::Converged(ConvergenceReason::RelativeCost);
                break;
            }
        }

        if status == RefineStatus::Running {
            status = RefineStatus::MaxIterReached;
        }
        let outcome = self.outcome(status, iterations, solves, started, log, timings);
        tracing::info!(
            "Refine finished: {} after {} iterations and {} solves, objective {:.6}",
            outcome.reason,
            outcome.iterations,
            outcome.solves,
            outcome.objective
        );
        Ok(outcome)
    }

    /// Extractor over the last accepted solve
    pub fn output(&self) -> Result<OutputExtractor> {
        match self.solution.as_ref() {
            Some(s) if s.is_solved => OutputExtractor::from_solution(&self.problem, s),
            _ => Err(PlannerError::SolverError("no successful solve to extract".into())),
        }
    }

    pub fn get_output_coefficients(&self) -> Result<(Vec<f64>, Array3<f64>)> {
        Ok(self.output()?.coefficients())
    }

    pub fn get_output_path(&self, n_samples: usize) -> Result<(f64, Array2<f64>)> {
        Ok(self.output()?.path(n_samples))
    }

    pub fn get_coef_matrix(&self) -> Result<Array3<f64>> {
        Ok(self.output()?.coef_matrix())
    }

    pub fn from_coef_matrix(&self, coef: &Array3<f64>) -> Result<Vec<f64>> {
        output::solution_from_coef_matrix(&self.problem, coef)
    }

    pub fn coefficients_to_solution(&self, poly: &Array3<f64>) -> Result<Vec<f64>> {
        output::coefficients_to_solution(&self.problem, poly)
    }

    pub fn eval_cost_constr(&self, coef: &Array3<f64>) -> Result<ConstraintReport> {
        output::eval_cost_constr(&self.problem, coef)
    }

    pub fn evaluate_at(&self, time: f64, derivative: usize) -> Result<[f64; 3]> {
        Ok(self.output()?.evaluate(time, derivative))
    }
}
