use std::path::Path;

use ottraj_basis::BezierBasis;
use ottraj_types::{BoundaryPack, Corridor, PlannerError, Result, TrajectoryConfig, SPATIAL_DIMS};
use serde::{Deserialize, Serialize};

/// On-disk form of a trajectory problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemFile {
    pub config: TrajectoryConfig,
    pub corridors: Vec<Corridor>,
    pub start: BoundaryPack,
    pub end: BoundaryPack,
    #[serde(default)]
    pub time_weight: f64,
}

/// Corridor sequence, boundary conditions and the per-segment time allocation
///
/// Every mutation bumps `generation`, so a solve can be matched against the
/// exact problem state it was computed for.
#[derive(Debug, Clone)]
pub struct TrajectoryProblem {
    config: TrajectoryConfig,
    basis: BezierBasis,
    corridors: Vec<Corridor>,
    room_time: Vec<f64>,
    start: BoundaryPack,
    end: BoundaryPack,
    time_weight: f64,
    generation: u64,
}

fn check_room_time(times: &[f64], expected: usize) -> Result<()> {
    if times.len() != expected {
        return Err(PlannerError::construction(format!(
            "expected {} segment times, got {}",
            expected,
            times.len()
        )));
    }
    if let Some((i, t)) = times.iter().enumerate().find(|(_, t)| !(t.is_finite() && **t > 0.0)) {
        return Err(PlannerError::construction(format!("segment {} has invalid time {}", i, t)));
    }
    Ok(())
}

impl TrajectoryProblem {
    /// Build a problem; the initial room times are taken from the corridors
    pub fn new(
        config: TrajectoryConfig,
        corridors: Vec<Corridor>,
        start: BoundaryPack,
        end: BoundaryPack,
    ) -> Result<Self> {
        config.validate()?;
        if corridors.is_empty() {
            return Err(PlannerError::construction("a trajectory needs at least one corridor"));
        }
        for (i, c) in corridors.iter().enumerate() {
            c.validate(i)?;
        }
        if !start.is_finite() || !end.is_finite() {
            return Err(PlannerError::construction("boundary conditions must be finite"));
        }
        let basis = BezierBasis::new(config.poly_order, config.minimize_order)?;
        let room_time = corridors.iter().map(|c| c.time).collect();
        Ok(TrajectoryProblem {
            config,
            basis,
            corridors,
            room_time,
            start,
            end,
            time_weight: 0.0,
            generation: 0,
        })
    }

    pub fn with_time_weight(mut self, weight: f64) -> Result<Self> {
        self.set_time_weight(weight)?;
        Ok(self)
    }

    pub fn from_file(file: ProblemFile) -> Result<Self> {
        TrajectoryProblem::new(file.config, file.corridors, file.start, file.end)?.with_time_weight(file.time_weight)
    }

    pub fn to_file(&self) -> ProblemFile {
        ProblemFile {
            config: self.config.clone(),
            corridors: self.corridors.clone(),
            start: self.start,
            end: self.end,
            time_weight: self.time_weight,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PlannerError::IoError(e.to_string()))?;
        let file: ProblemFile =
            serde_json::from_str(&text).map_err(|e| PlannerError::SerializationError(e.to_string()))?;
        Self::from_file(file)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.to_file())
            .map_err(|e| PlannerError::SerializationError(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| PlannerError::IoError(e.to_string()))
    }

    pub fn config(&self) -> &TrajectoryConfig {
        &self.config
    }

    pub fn basis(&self) -> &BezierBasis {
        &self.basis
    }

    pub fn corridors(&self) -> &[Corridor] {
        &self.corridors
    }

    pub fn start(&self) -> &BoundaryPack {
        &self.start
    }

    pub fn end(&self) -> &BoundaryPack {
        &self.end
    }

    pub fn time_weight(&self) -> f64 {
        self.time_weight
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn num_segments(&self) -> usize {
        self.corridors.len()
    }

    pub fn room_time(&self) -> &[f64] {
        &self.room_time
    }

    pub fn total_time(&self) -> f64 {
        self.room_time.iter().sum()
    }

    pub fn poly_order(&self) -> usize {
        self.config.poly_order
    }

    /// Decision variables per segment
    pub fn segment_vars(&self) -> usize {
        SPATIAL_DIMS * self.config.points_per_axis()
    }

    pub fn num_vars(&self) -> usize {
        self.num_segments() * self.segment_vars()
    }

    /// Index of control point `j` of axis `dim` in segment `k`
    pub fn var_index(&self, k: usize, dim: usize, j: usize) -> usize {
        k * self.segment_vars() + dim * self.config.points_per_axis() + j
    }

    /// Time cost `w * sum(t)` for a time vector
    pub fn time_cost(&self, times: &[f64]) -> f64 {
        self.time_weight * times.iter().sum::<f64>()
    }

    pub fn set_start(&mut self, start: BoundaryPack) -> Result<()> {
        if !start.is_finite() {
            return Err(PlannerError::construction("start conditions must be finite"));
        }
        self.start = start;
        self.generation += 1;
        Ok(())
    }

    pub fn set_end(&mut self, end: BoundaryPack) -> Result<()> {
        if !end.is_finite() {
            return Err(PlannerError::construction("end conditions must be finite"));
        }
        self.end = end;
        self.generation += 1;
        Ok(())
    }

    pub fn set_time_weight(&mut self, weight: f64) -> Result<()> {
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(PlannerError::construction(format!("invalid time weight {}", weight)));
        }
        self.time_weight = weight;
        self.generation += 1;
        Ok(())
    }

    /// Replace the time allocation, keeping corridor times in step
    pub fn set_room_time(&mut self, times: &[f64]) -> Result<()> {
        check_room_time(times, self.num_segments())?;
        self.room_time.copy_from_slice(times);
        for (c, &t) in self.corridors.iter_mut().zip(times) {
            c.time = t;
        }
        self.generation += 1;
        Ok(())
    }

    /// Validate a candidate time vector without applying it
    pub fn check_room_time(&self, times: &[f64]) -> Result<()> {
        check_room_time(times, self.num_segments())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_rooms() -> TrajectoryProblem {
        let corridors = vec![
            Corridor::new([0.0, 0.0, 0.0], [2.0, 1.0, 1.0], 1.0),
            Corridor::new([1.5, 0.0, 0.0], [3.0, 1.0, 1.0], 1.5),
        ];
        TrajectoryProblem::new(
            TrajectoryConfig::default(),
            corridors,
            BoundaryPack::at_rest([0.5, 0.5, 0.5]),
            BoundaryPack::at_rest([2.5, 0.5, 0.5]),
        )
        .unwrap()
    }

    #[test]
    fn test_setters_bump_generation() {
        let mut problem = two_rooms();
        assert_eq!(problem.generation(), 0);
        problem.set_time_weight(0.5).unwrap();
        problem.set_start(BoundaryPack::at_rest([0.4, 0.5, 0.5])).unwrap();
        problem.set_room_time(&[1.2, 1.3]).unwrap();
        assert_eq!(problem.generation(), 3);
        assert_eq!(problem.corridors()[1].time, 1.3);
        assert!((problem.total_time() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_times() {
        let mut problem = two_rooms();
        assert!(problem.set_room_time(&[1.0, 0.0]).is_err());
        assert!(problem.set_room_time(&[1.0]).is_err());
        assert!(problem.set_room_time(&[1.0, f64::NAN]).is_err());
        assert_eq!(problem.room_time(), &[1.0, 1.5]);
        assert_eq!(problem.generation(), 0);
    }

    #[test]
    fn test_var_index_layout() {
        let problem = two_rooms();
        assert_eq!(problem.num_vars(), 42);
        assert_eq!(problem.var_index(1, 2, 3), 21 + 14 + 3);
    }

    #[test]
    fn test_rejects_empty_corridors() {
        let result = TrajectoryProblem::new(
            TrajectoryConfig::default(),
            Vec::new(),
            BoundaryPack::default(),
            BoundaryPack::default(),
        );
        assert!(matches!(result, Err(PlannerError::Construction(_))));
    }
}
