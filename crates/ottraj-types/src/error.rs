use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("Construction error: {0}")]
    Construction(String),

    #[error("Solver error: {0}")]
    SolverError(String),

    #[error("Infeasible problem: {0}")]
    Infeasible(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl PlannerError {
    /// Shorthand for the fatal construction class
    pub fn construction(msg: impl Into<String>) -> Self {
        PlannerError::Construction(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;
