use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a single HTTP fetch did not produce a body.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited (HTTP {0})")]
    RateLimited(u16),

    #[error("blocked (HTTP {0})")]
    Blocked(u16),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS handshake terminated: {0}")]
    Handshake(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("interrupted during backoff")]
    Interrupted,

    #[error("invalid proxy {0}")]
    InvalidProxy(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<FetchError>,
    },
}

/// Backoff bucket for a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// HTTP 429.
    RateLimited,
    /// HTTP 403/409, usually an IP-level block.
    Blocked,
    /// Timeouts, refused connections, dropped TLS handshakes.
    Transient,
}

impl FetchError {
    /// `None` means the failure is final and must not be retried.
    pub fn retry_class(&self) -> Option<RetryClass> {
        match self {
            FetchError::RateLimited(_) => Some(RetryClass::RateLimited),
            FetchError::Blocked(_) => Some(RetryClass::Blocked),
            FetchError::Timeout | FetchError::Connect(_) | FetchError::Handshake(_) => {
                Some(RetryClass::Transient)
            }
            FetchError::Status { .. }
            | FetchError::Body(_)
            | FetchError::Transport(_)
            | FetchError::Interrupted
            | FetchError::InvalidProxy(_)
            | FetchError::Exhausted { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_class().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(FetchError::RateLimited(429).retry_class(), Some(RetryClass::RateLimited));
        assert_eq!(FetchError::Blocked(409).retry_class(), Some(RetryClass::Blocked));
        assert_eq!(FetchError::Timeout.retry_class(), Some(RetryClass::Transient));
        assert!(!FetchError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!FetchError::Interrupted.is_retryable());
    }

    #[test]
    fn exhausted_reports_last_cause() {
        let err = FetchError::Exhausted {
            attempts: 4,
            last: Box::new(FetchError::Blocked(403)),
        };
        assert_eq!(err.to_string(), "gave up after 4 attempts: blocked (HTTP 403)");
    }
}
