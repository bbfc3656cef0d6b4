use std::path::Path;

use ndarray::Array3;
use ottraj_types::{PlannerError, Result};
use serde::{Deserialize, Serialize};

use crate::hashing::{ArrayDigest, HashRef};

/// Named arrays handed to downstream consumers of a refined trajectory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryBundle {
    pub room_time: Vec<f64>,
    /// Row-major `[segment, power, axis]` monomial coefficients
    pub coefficients: Vec<f64>,
    pub coefficients_shape: [usize; 3],
    /// Interleaved objective and elapsed seconds
    #[serde(default)]
    pub convergence_log: Vec<f64>,
}

impl TrajectoryBundle {
    pub fn new(room_time: Vec<f64>, coefficients: &Array3<f64>) -> Result<Self> {
        let (n, np, dims) = coefficients.dim();
        if n != room_time.len() {
            return Err(PlannerError::construction(format!(
                "{} segment times for {} coefficient blocks",
                room_time.len(),
                n
            )));
        }
        Ok(TrajectoryBundle {
            room_time,
            // iter() walks the logical order regardless of memory layout
            coefficients: coefficients.iter().copied().collect(),
            coefficients_shape: [n, np, dims],
            convergence_log: Vec::new(),
        })
    }

    pub fn with_log(mut self, log: &[(f64, f64)]) -> Self {
        self.convergence_log = log.iter().flat_map(|&(obj, t)| [obj, t]).collect();
        self
    }

    pub fn coefficients(&self) -> Result<Array3<f64>> {
        let [n, np, dims] = self.coefficients_shape;
        Array3::from_shape_vec((n, np, dims), self.coefficients.clone())
            .map_err(|e| PlannerError::SerializationError(e.to_string()))
    }

    /// (objective, elapsed) pairs
    pub fn log_pairs(&self) -> Vec<(f64, f64)> {
        self.convergence_log.chunks_exact(2).map(|c| (c[0], c[1])).collect()
    }

    /// Content digest over the times, coefficient shape and values, and log
    pub fn hash(&self) -> Result<HashRef> {
        let [n, np, dims] = self.coefficients_shape;
        if n * np * dims != self.coefficients.len() {
            return Err(PlannerError::SerializationError("coefficients do not match their shape".into()));
        }
        Ok(ArrayDigest::new()
            .floats(&self.room_time)
            .dims(&self.coefficients_shape)
            .floats(&self.coefficients)
            .floats(&self.convergence_log)
            .finish())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PlannerError::SerializationError(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let bundle: TrajectoryBundle =
            serde_json::from_str(text).map_err(|e| PlannerError::SerializationError(e.to_string()))?;
        let [n, np, dims] = bundle.coefficients_shape;
        if n * np * dims != bundle.coefficients.len() || bundle.convergence_log.len() % 2 != 0 {
            return Err(PlannerError::SerializationError("bundle arrays do not match their shapes".into()));
        }
        Ok(bundle)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|e| PlannerError::IoError(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| PlannerError::IoError(e.to_string()))?;
        Self::from_json(&text)
    }
}
