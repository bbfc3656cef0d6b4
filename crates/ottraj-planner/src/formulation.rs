use nalgebra::DMatrix;
use ottraj_basis::{binomial, falling};
use ottraj_solver::QpInstance;
use ottraj_types::{BoundaryPack, Corridor, PlannerError, Result, TrajectoryConfig, SPATIAL_DIMS};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::problem::TrajectoryProblem;

/// Which part of the symmetric cost matrix to store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostTriangle {
    Full,
    Upper,
    Lower,
}

/// Constraint family of a row of `A`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowKind {
    Velocity,
    Acceleration,
    /// Start or end condition of the given derivative order
    Boundary(usize),
    /// Matching of the given derivative order across a joint
    Continuity(usize),
}

impl RowKind {
    /// Each coefficient of the row scales with its segment time raised to this power
    pub fn time_exponent(self) -> i32 {
        match self {
            RowKind::Velocity => 0,
            RowKind::Acceleration => -1,
            RowKind::Boundary(d) | RowKind::Continuity(d) => 1 - d as i32,
        }
    }
}

/// General rows and variable bounds of the trajectory QP
#[derive(Debug, Clone)]
pub struct LinearConstraints {
    pub a: CsMat<f64>,
    pub clb: Vec<f64>,
    pub cub: Vec<f64>,
    pub xlb: Vec<f64>,
    pub xub: Vec<f64>,
    pub kinds: Vec<RowKind>,
}

impl LinearConstraints {
    pub fn num_rows(&self) -> usize {
        self.kinds.len()
    }
}

/// Forward difference weights (-1)^(d-i) C(d, i)
fn difference_weights(d: usize) -> Vec<f64> {
    (0..=d)
        .map(|i| {
            let sign = if (d - i) % 2 == 0 { 1.0 } else { -1.0 };
            sign * binomial(d, i)
        })
        .collect()
}

struct RowBuilder {
    entries: Vec<(usize, usize, f64)>,
    clb: Vec<f64>,
    cub: Vec<f64>,
    kinds: Vec<RowKind>,
}

impl RowBuilder {
    fn new() -> Self {
        RowBuilder {
            entries: Vec::new(),
            clb: Vec::new(),
            cub: Vec::new(),
            kinds: Vec::new(),
        }
    }

    fn push(&mut self, kind: RowKind, coeffs: &[(usize, f64)], lb: f64, ub: f64) {
        let row = self.kinds.len();
        self.entries.extend(coeffs.iter().map(|&(col, v)| (row, col, v)));
        self.clb.push(lb);
        self.cub.push(ub);
        self.kinds.push(kind);
    }
}

fn check_times(room_time: &[f64], n_seg: usize) -> Result<()> {
    if n_seg == 0 {
        return Err(PlannerError::construction("zero segments"));
    }
    if room_time.len() != n_seg {
        return Err(PlannerError::construction(format!(
            "{} segment times for {} segments",
            room_time.len(),
            n_seg
        )));
    }
    if room_time.iter().any(|t| !(t.is_finite() && *t > 0.0)) {
        return Err(PlannerError::construction("segment times must be positive"));
    }
    Ok(())
}

/// Block-diagonal cost matrix; segment k's axis block is `MQM * t_k^(3 - 2r)`.
///
/// Returns the matrix and the number of variables.
pub fn construct_cost(
    minimize_order: usize,
    n_seg: usize,
    poly_order: usize,
    room_time: &[f64],
    mqm: &DMatrix<f64>,
    triangle: CostTriangle,
) -> Result<(CsMat<f64>, usize)> {
    check_times(room_time, n_seg)?;
    let np = poly_order + 1;
    if mqm.nrows() != np || mqm.ncols() != np {
        return Err(PlannerError::construction(format!(
            "weighting operator is {}x{}, expected {}x{}",
            mqm.nrows(),
            mqm.ncols(),
            np,
            np
        )));
    }
    let n_var = n_seg * SPATIAL_DIMS * np;
    let exponent = 3 - 2 * minimize_order as i32;

    let mut tri = TriMat::new((n_var, n_var));
    for (k, &t) in room_time.iter().enumerate() {
        let scale = t.powi(exponent);
        for dim in 0..SPATIAL_DIMS {
            let offset = (k * SPATIAL_DIMS + dim) * np;
            for i in 0..np {
                for j in 0..np {
                    let keep = match triangle {
                        CostTriangle::Full => true,
                        CostTriangle::Upper => i <= j,
                        CostTriangle::Lower => i >= j,
                    };
                    let v = mqm[(i, j)];
                    if keep && v != 0.0 {
                        tri.add_triplet(offset + i, offset + j, v * scale);
                    }
                }
            }
        }
    }
    Ok((tri.to_csc(), n_var))
}

/// Corridor bounds, dynamic limits, boundary pins and joint continuity
pub fn construct_constraints(
    corridors: &[Corridor],
    room_time: &[f64],
    start: &BoundaryPack,
    end: &BoundaryPack,
    config: &TrajectoryConfig,
) -> Result<LinearConstraints> {
    config.validate()?;
    let n_seg = corridors.len();
    check_times(room_time, n_seg)?;
    let p = config.poly_order;
    let np = p + 1;
    let seg_vars = SPATIAL_DIMS * np;
    let n_var = n_seg * seg_vars;
    let idx = |k: usize, dim: usize, j: usize| k * seg_vars + dim * np + j;

    // Corridor containment through the control-point hull
    let mut xlb = vec![0.0; n_var];
    let mut xub = vec![0.0; n_var];
    for (k, (corridor, &t)) in corridors.iter().zip(room_time).enumerate() {
        corridor.validate(k)?;
        let (lo, hi) = if k == 0 {
            (corridor.lower, corridor.upper)
        } else {
            corridor.shrunk(config.margin)?
        };
        for dim in 0..SPATIAL_DIMS {
            for j in 0..np {
                xlb[idx(k, dim, j)] = lo[dim] / t;
                xub[idx(k, dim, j)] = hi[dim] / t;
            }
        }
    }

    let mut rows = RowBuilder::new();

    if let Some(v) = config.limits.velocity {
        let scale = p as f64;
        for k in 0..n_seg {
            for dim in 0..SPATIAL_DIMS {
                for j in 0..p {
                    rows.push(
                        RowKind::Velocity,
                        &[(idx(k, dim, j), -scale), (idx(k, dim, j + 1), scale)],
                        -v,
                        v,
                    );
                }
            }
        }
    }

    if let Some(a) = config.limits.acceleration {
        let w = difference_weights(2);
        for (k, &t) in room_time.iter().enumerate() {
            let scale = falling(p, 2) / t;
            for dim in 0..SPATIAL_DIMS {
                for j in 0..p.saturating_sub(1) {
                    let coeffs: Vec<_> = (0..3).map(|i| (idx(k, dim, j + i), scale * w[i])).collect();
                    rows.push(RowKind::Acceleration, &coeffs, -a, a);
                }
            }
        }
    }

    let last = n_seg - 1;
    for d in (0..BoundaryPack::ORDERS).filter(|&d| d <= p) {
        let w = difference_weights(d);
        let exponent = 1 - d as i32;
        let start_values = start.derivative(d).unwrap_or([0.0; 3]);
        let end_values = end.derivative(d).unwrap_or([0.0; 3]);
        let start_scale = falling(p, d) * room_time[0].powi(exponent);
        let end_scale = falling(p, d) * room_time[last].powi(exponent);
        for dim in 0..SPATIAL_DIMS {
            let coeffs: Vec<_> = (0..=d).map(|i| (idx(0, dim, i), start_scale * w[i])).collect();
            rows.push(RowKind::Boundary(d), &coeffs, start_values[dim], start_values[dim]);
            let coeffs: Vec<_> = (0..=d).map(|i| (idx(last, dim, p - d + i), end_scale * w[i])).collect();
            rows.push(RowKind::Boundary(d), &coeffs, end_values[dim], end_values[dim]);
        }
    }

    for k in 0..last {
        for d in 0..=config.continuity_order {
            let w = difference_weights(d);
            let exponent = 1 - d as i32;
            let left = room_time[k].powi(exponent);
            let right = room_time[k + 1].powi(exponent);
            for dim in 0..SPATIAL_DIMS {
                let mut coeffs: Vec<_> = (0..=d).map(|i| (idx(k, dim, p - d + i), left * w[i])).collect();
                coeffs.extend((0..=d).map(|i| (idx(k + 1, dim, i), -right * w[i])));
                rows.push(RowKind::Continuity(d), &coeffs, 0.0, 0.0);
            }
        }
    }

    let mut tri = TriMat::new((rows.kinds.len(), n_var));
    for &(r, c, v) in &rows.entries {
        tri.add_triplet(r, c, v);
    }
    Ok(LinearConstraints {
        a: tri.to_csc(),
        clb: rows.clb,
        cub: rows.cub,
        xlb,
        xub,
        kinds: rows.kinds,
    })
}

/// Assemble the QP for `problem` under the time vector `room_time`
///
/// The problem's own times are not touched; `generation` tags the instance.
pub fn build_instance(problem: &TrajectoryProblem, room_time: &[f64], generation: u64) -> Result<QpInstance> {
    let config = problem.config();
    let (p, n_var) = construct_cost(
        config.minimize_order,
        problem.num_segments(),
        config.poly_order,
        room_time,
        problem.basis().mqm(),
        CostTriangle::Full,
    )?;
    let cons = construct_constraints(problem.corridors(), room_time, problem.start(), problem.end(), config)?;
    let qp = QpInstance::new(
        p,
        vec![0.0; n_var],
        cons.a,
        cons.clb,
        cons.cub,
        cons.xlb,
        cons.xub,
        generation,
    );
    qp.validate()?;
    Ok(qp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ottraj_basis::BezierBasis;
    use ottraj_types::DynamicLimits;

    fn corridors() -> Vec<Corridor> {
        vec![
            Corridor::new([0.0, 0.0, 0.0], [2.0, 1.0, 1.0], 1.0),
            Corridor::new([1.5, 0.0, 0.0], [3.0, 2.0, 1.0], 2.0),
        ]
    }

    #[test]
    fn test_cost_scaling_and_triangles() {
        let basis = BezierBasis::new(4, 2).unwrap();
        let (full, n) = construct_cost(2, 2, 4, &[1.0, 2.0], basis.mqm(), CostTriangle::Full).unwrap();
        assert_eq!(n, 30);
        // t^(3 - 2r) = 2^-1 on the second segment
        let a = full.get(0, 0).copied().unwrap_or(0.0);
        let b = full.get(15, 15).copied().unwrap_or(0.0);
        assert!((b - 0.5 * a).abs() < 1e-12);

        let (upper, _) = construct_cost(2, 2, 4, &[1.0, 2.0], basis.mqm(), CostTriangle::Upper).unwrap();
        let (lower, _) = construct_cost(2, 2, 4, &[1.0, 2.0], basis.mqm(), CostTriangle::Lower).unwrap();
        assert!(upper.iter().all(|(_, (r, c))| r <= c));
        assert!(lower.iter().all(|(_, (r, c))| r >= c));
        assert_eq!(upper.nnz(), lower.nnz());
    }

    #[test]
    fn test_cost_rejects_wrong_operator() {
        let basis = BezierBasis::new(5, 2).unwrap();
        let result = construct_cost(2, 1, 4, &[1.0], basis.mqm(), CostTriangle::Full);
        assert!(matches!(result, Err(PlannerError::Construction(_))));
    }

    #[test]
    fn test_row_counts_and_kinds() {
        let config = TrajectoryConfig {
            limits: DynamicLimits {
                velocity: Some(2.0),
                acceleration: Some(3.0),
            },
            ..TrajectoryConfig::default()
        };
        let start = BoundaryPack::at_rest([0.5, 0.5, 0.5]);
        let end = BoundaryPack::at_rest([2.5, 1.0, 0.5]);
        let cons = construct_constraints(&corridors(), &[1.0, 2.0], &start, &end, &config).unwrap();

        let count = |kind: fn(&RowKind) -> bool| cons.kinds.iter().filter(|k| kind(k)).count();
        assert_eq!(count(|k| matches!(k, RowKind::Velocity)), 2 * 3 * 6);
        assert_eq!(count(|k| matches!(k, RowKind::Acceleration)), 2 * 3 * 5);
        assert_eq!(count(|k| matches!(k, RowKind::Boundary(_))), 2 * 3 * 3);
        assert_eq!(count(|k| matches!(k, RowKind::Continuity(_))), 3 * 3);
        assert_eq!(cons.a.rows(), cons.num_rows());
        assert_eq!(cons.a.cols(), 42);
    }

    #[test]
    fn test_margin_skips_first_segment() {
        let config = TrajectoryConfig {
            margin: 0.1,
            ..TrajectoryConfig::default()
        };
        let start = BoundaryPack::at_rest([0.0, 0.5, 0.5]);
        let end = BoundaryPack::at_rest([2.5, 1.0, 0.5]);
        let cons = construct_constraints(&corridors(), &[1.0, 2.0], &start, &end, &config).unwrap();
        assert_eq!(cons.xlb[0], 0.0);
        assert!((cons.xlb[21] - 1.6 / 2.0).abs() < 1e-12);
        assert!((cons.xub[21] - 2.9 / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_time_exponents() {
        assert_eq!(RowKind::Velocity.time_exponent(), 0);
        assert_eq!(RowKind::Acceleration.time_exponent(), -1);
        assert_eq!(RowKind::Boundary(0).time_exponent(), 1);
        assert_eq!(RowKind::Continuity(2).time_exponent(), -1);
    }

    #[test]
    fn test_straight_line_satisfies_rows() {
        // Control points evenly spaced on a line, scaled by 1/t, satisfy the position pins
        let config = TrajectoryConfig::default();
        let start = BoundaryPack::new([0.0; 3], [1.0, 0.0, 0.0], [0.0; 3]);
        let end = BoundaryPack::new([1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0; 3]);
        let corridor = vec![Corridor::new([-1.0; 3], [2.0; 3], 1.0)];
        let cons = construct_constraints(&corridor, &[1.0], &start, &end, &config).unwrap();
        let mut x = vec![0.0; 21];
        for j in 0..7 {
            x[j] = j as f64 / 6.0;
        }
        let mut values = vec![0.0; cons.num_rows()];
        for (&v, (r, c)) in cons.a.iter() {
            values[r] += v * x[c];
        }
        for (i, v) in values.iter().enumerate() {
            assert!((v - cons.clb[i]).abs() < 1e-12, "row {} ({:?})", i, cons.kinds[i]);
        }
    }
}
