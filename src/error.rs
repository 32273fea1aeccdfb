use std::time::Duration;
use thiserror::Error;

/// Machine-readable classification of an [`Error`].
///
/// Callers that need to branch on failure class (retry, surface, degrade)
/// should match on this instead of parsing display strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Admission was refused and no fallback entry was available.
    QuotaExceeded,
    /// A backend returned a non-success response.
    Backend,
    /// A backend call exceeded its deadline.
    Timeout,
    /// Every eligible backend exhausted its retry budget.
    AllBackendsExhausted,
    /// A successful response was rejected by the output security filter.
    SecurityFilterRejected,
    /// Invalid or unloadable configuration.
    Config,
    /// Durable storage (config or fallback persistence) failed.
    Storage,
    /// Payload could not be serialized or deserialized.
    Serialization,
    /// The HTTP transport failed below the application layer.
    Transport,
    /// The background dispatcher stopped before completing a queued call.
    Dispatcher,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Backend => "backend_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AllBackendsExhausted => "all_backends_exhausted",
            ErrorKind::SecurityFilterRejected => "security_filter_rejected",
            ErrorKind::Config => "config_error",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Serialization => "serialization_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Dispatcher => "dispatcher_stopped",
        }
    }
}

/// Unified error type for the dispatch engine.
///
/// Only terminal failures cross the orchestrator boundary: `QuotaExceeded`
/// when admission is refused with no fallback entry, and
/// `AllBackendsExhausted` once every eligible backend has used up its retry
/// budget. `Backend` and `Timeout` are retried internally and only escalate
/// wrapped in one of the terminal variants' attempt counts.
#[derive(Debug, Error)]
pub enum Error {
    #[error("quota exceeded for resource `{resource}`, retry after {}s", .retry_after.as_secs())]
    QuotaExceeded {
        resource: String,
        retry_after: Duration,
    },

    #[error("backend `{backend}` failed: {message}")]
    Backend {
        backend: String,
        message: String,
        /// HTTP status when the failure came from a non-success response.
        status: Option<u16>,
    },

    #[error("backend `{backend}` timed out after {}ms", .elapsed.as_millis())]
    Timeout { backend: String, elapsed: Duration },

    #[error("all backends failed after {attempts} attempts")]
    AllBackendsExhausted { attempts: u32 },

    #[error("response from backend `{backend}` rejected by security filter")]
    SecurityFilterRejected { backend: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("dispatcher stopped before completing the queued call")]
    DispatcherStopped,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Error::Backend { .. } => ErrorKind::Backend,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::AllBackendsExhausted { .. } => ErrorKind::AllBackendsExhausted,
            Error::SecurityFilterRejected { .. } => ErrorKind::SecurityFilterRejected,
            Error::Config(_) => ErrorKind::Config,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Serialization(_) | Error::Yaml(_) => ErrorKind::Serialization,
            Error::Transport(_) => ErrorKind::Transport,
            Error::DispatcherStopped => ErrorKind::Dispatcher,
        }
    }

    /// Whether the orchestrator's retry loop may attempt this call again.
    ///
    /// Timeouts are treated identically to backend errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Backend | ErrorKind::Timeout | ErrorKind::Transport
        )
    }
}
