mod corridor;
mod boundary;
mod config;
mod error;

pub use corridor::Corridor;
pub use boundary::BoundaryPack;
pub use config::{DynamicLimits, TrajectoryConfig};
pub use error::{PlannerError, Result};

/// Number of spatial dimensions every trajectory lives in
pub const SPATIAL_DIMS: usize = 3;
