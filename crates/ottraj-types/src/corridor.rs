use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};

/// Axis-aligned safe box that one trajectory segment must stay inside
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corridor {
    pub lower: [f64; 3],
    pub upper: [f64; 3],
    /// Time allocated to the segment that flies through this box
    pub time: f64,
}

impl Corridor {
    pub fn new(lower: [f64; 3], upper: [f64; 3], time: f64) -> Self {
        Corridor { lower, upper, time }
    }

    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.lower[0] + self.upper[0]),
            0.5 * (self.lower[1] + self.upper[1]),
            0.5 * (self.lower[2] + self.upper[2]),
        ]
    }

    pub fn contains(&self, point: &[f64; 3], tol: f64) -> bool {
        (0..3).all(|d| point[d] >= self.lower[d] - tol && point[d] <= self.upper[d] + tol)
    }

    /// Box limits after pulling every wall inwards by `margin`
    pub fn shrunk(&self, margin: f64) -> Result<([f64; 3], [f64; 3])> {
        let mut lo = self.lower;
        let mut hi = self.upper;
        for d in 0..3 {
            lo[d] += margin;
            hi[d] -= margin;
            if lo[d] > hi[d] {
                return Err(PlannerError::construction(format!(
                    "corridor collapses along axis {} with margin {}: [{}, {}]",
                    d, margin, self.lower[d], self.upper[d]
                )));
            }
        }
        Ok((lo, hi))
    }

    /// Check the box is well formed and carries a usable time
    pub fn validate(&self, index: usize) -> Result<()> {
        for d in 0..3 {
            if !self.lower[d].is_finite() || !self.upper[d].is_finite() {
                return Err(PlannerError::construction(format!(
                    "corridor {} has a non-finite wall on axis {}",
                    index, d
                )));
            }
            if self.lower[d] > self.upper[d] {
                return Err(PlannerError::construction(format!(
                    "corridor {} is inverted on axis {}: {} > {}",
                    index, d, self.lower[d], self.upper[d]
                )));
            }
        }
        if !(self.time.is_finite() && self.time > 0.0) {
            return Err(PlannerError::construction(format!(
                "corridor {} has non-positive time {}",
                index, self.time
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrunk_box() {
        let c = Corridor::new([0.0, 0.0, 0.0], [2.0, 4.0, 1.0], 1.0);
        let (lo, hi) = c.shrunk(0.25).unwrap();
        assert_eq!(lo, [0.25, 0.25, 0.25]);
        assert_eq!(hi, [1.75, 3.75, 0.75]);
    }

    #[test]
    fn test_margin_too_large() {
        let c = Corridor::new([0.0, 0.0, 0.0], [2.0, 4.0, 1.0], 1.0);
        assert!(c.shrunk(0.6).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_time() {
        let c = Corridor::new([0.0; 3], [1.0; 3], 0.0);
        assert!(matches!(c.validate(3), Err(PlannerError::Construction(_))));
    }
}
