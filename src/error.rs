use thiserror::Error;

/// Failure taxonomy for the bridge.
///
/// No variant is permitted to terminate the polling loop or the session
/// registry; callers convert failures into status events or retries at the
/// operation boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Extraction source offline or unreachable. Non-fatal; retried with
    /// backoff and surfaced to clients as a warning status.
    #[error("extraction source unavailable: {0}")]
    SourceUnavailable(String),

    /// Every injection sink in the chain was tried and failed.
    #[error("injection failed: {0}")]
    InjectionFailed(String),

    /// Invalid protocol frame from a client. Logged and dropped; the
    /// connection stays open.
    #[error("malformed client message: {0}")]
    MalformedClientMessage(String),

    /// Transport closed underneath an operation.
    #[error("transport closed")]
    TransportClosed,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = BridgeError::SessionNotFound("abc".to_string());
        assert!(err.to_string().contains("abc"));

        let err = BridgeError::SourceUnavailable("CDP endpoint down".to_string());
        assert!(err.to_string().contains("CDP endpoint down"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
