use thiserror::Error;

/// Failure of a single engine call, classified for the retry policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The call never produced a response: connection refused, timeout,
    /// unreadable local file.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine answered and reported a failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// The engine answered with something that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// All engine failures are currently retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport(_) | EngineError::Engine(_) | EngineError::Protocol(_) => true,
        }
    }
}
