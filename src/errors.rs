/// Domain-specific error types for the simulation engine and its service shell.
/// A returned `SimulationResult` is always complete; every failure mode below
/// aborts the whole request rather than yielding a partial ensemble.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("simulation cancelled")]
    Cancelled,

    #[error("worker fault: {0}")]
    WorkerFault(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("scenario interpreter error: {0}")]
    Scenario(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Shorthand used by validation code.
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidParameters(msg.into())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
