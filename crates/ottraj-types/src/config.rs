use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};

/// Optional component-wise limits on velocity and acceleration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicLimits {
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
}

/// Shape of the piecewise polynomial being planned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Polynomial order of every segment
    pub poly_order: usize,
    /// Derivative whose squared integral is minimized (3 = jerk)
    pub minimize_order: usize,
    /// Highest derivative matched at segment joins
    pub continuity_order: usize,
    /// Distance kept from corridor walls (not applied to the first segment)
    pub margin: f64,
    pub limits: DynamicLimits,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        TrajectoryConfig {
            poly_order: 6,
            minimize_order: 3,
            continuity_order: 2,
            margin: 0.0,
            limits: DynamicLimits::default(),
        }
    }
}

impl TrajectoryConfig {
    /// Control points per segment and axis
    pub fn points_per_axis(&self) -> usize {
        self.poly_order + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.poly_order == 0 {
            return Err(PlannerError::construction("polynomial order must be at least 1"));
        }
        if self.minimize_order == 0 || self.minimize_order > self.poly_order {
            return Err(PlannerError::construction(format!(
                "minimize order {} must lie in 1..={}",
                self.minimize_order, self.poly_order
            )));
        }
        if self.continuity_order > self.poly_order {
            return Err(PlannerError::construction(format!(
                "continuity order {} exceeds polynomial order {}",
                self.continuity_order, self.poly_order
            )));
        }
        if !(self.margin.is_finite() && self.margin >= 0.0) {
            return Err(PlannerError::construction(format!("invalid margin {}", self.margin)));
        }
        for (name, limit) in [("velocity", self.limits.velocity), ("acceleration", self.limits.acceleration)] {
            if let Some(v) = limit {
                if !(v.is_finite() && v > 0.0) {
                    return Err(PlannerError::construction(format!("invalid {} limit {}", name, v)));
                }
            }
        }
        Ok(())
    }
}
