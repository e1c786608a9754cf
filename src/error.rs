use std::fmt;

use rusoto_core::RusotoError;

/// Failure reported by a sink adapter or its service client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
    /// Another actor is modifying the same resource; retry after a back-off.
    #[error("operation aborted by a concurrent change: {0}")]
    OperationAborted(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("timed out waiting for {0} to become available")]
    ProvisioningTimeout(String),
    #[error("service error: {0}")]
    Service(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("interrupted by shutdown")]
    Interrupted,
}

impl SinkError {
    /// Folds a rusoto error into a sink error, delegating service-specific
    /// errors to `service`.
    pub(crate) fn from_rusoto<E, F>(error: RusotoError<E>, service: F) -> Self
    where
        F: FnOnce(E) -> SinkError,
    {
        match error {
            RusotoError::Service(err) => service(err),
            RusotoError::HttpDispatch(err) => Self::Transport(err.to_string()),
            RusotoError::Credentials(err) => Self::Credentials(err.to_string()),
            RusotoError::Validation(msg) => Self::Service(msg),
            RusotoError::ParseError(msg) => Self::Service(msg),
            RusotoError::Unknown(resp) => Self::Service(format!(
                "unexpected response (status {}): {}",
                resp.status,
                resp.body_as_str()
            )),
            RusotoError::Blocking => Self::Transport("blocking call failed".to_string()),
        }
    }

    pub(crate) fn service<E: fmt::Display>(error: E) -> Self {
        Self::Service(error.to_string())
    }
}

/// Fatal writer failure, exposed to the owning layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriterError {
    #[error("unable to create client: {0}")]
    ClientSetup(SinkError),
    #[error("destination unavailable: {0}")]
    DestinationUnavailable(SinkError),
    #[error("writer panicked: {0}")]
    Panicked(String),
    #[error("writer runtime error: {0}")]
    Runtime(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid discard action: {0:?} (expected none, oldest or newest)")]
    InvalidDiscardAction(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppenderError {
    #[error("appender has been closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WriterError::DestinationUnavailable(SinkError::ProvisioningTimeout(
            "log group example".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "destination unavailable: timed out waiting for log group example to become available"
        );
    }

    #[test]
    fn test_from_rusoto_service_error_is_delegated() {
        let error: RusotoError<String> = RusotoError::Service("boom".to_string());
        let folded = SinkError::from_rusoto(error, SinkError::AlreadyExists);
        assert_eq!(folded, SinkError::AlreadyExists("boom".to_string()));
    }

    #[test]
    fn test_from_rusoto_transport_errors() {
        let error: RusotoError<String> = RusotoError::Validation("bad name".to_string());
        assert_eq!(
            SinkError::from_rusoto(error, SinkError::service),
            SinkError::Service("bad name".to_string())
        );

        let error: RusotoError<String> = RusotoError::Blocking;
        assert!(matches!(
            SinkError::from_rusoto(error, SinkError::service),
            SinkError::Transport(_)
        ));
    }
}
