use serde::{Deserialize, Serialize};

/// Position, velocity and acceleration pinned at one end of the trajectory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryPack {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub acceleration: [f64; 3],
}

impl BoundaryPack {
    /// Number of derivative orders a pack pins
    pub const ORDERS: usize = 3;

    pub fn new(position: [f64; 3], velocity: [f64; 3], acceleration: [f64; 3]) -> Self {
        BoundaryPack { position, velocity, acceleration }
    }

    /// Hover at `position`
    pub fn at_rest(position: [f64; 3]) -> Self {
        BoundaryPack {
            position,
            velocity: [0.0; 3],
            acceleration: [0.0; 3],
        }
    }

    /// Value pinned for derivative `order` (0 = position)
    pub fn derivative(&self, order: usize) -> Option<[f64; 3]> {
        match order {
            0 => Some(self.position),
            1 => Some(self.velocity),
            2 => Some(self.acceleration),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position
            .iter()
            .chain(self.velocity.iter())
            .chain(self.acceleration.iter())
            .all(|v| v.is_finite())
    }
}

impl Default for BoundaryPack {
    fn default() -> Self {
        BoundaryPack::at_rest([0.0; 3])
    }
}
