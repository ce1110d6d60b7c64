// src/error.rs
use thiserror::Error;

/// Error taxonomy for the request optimization engine.
///
/// Variants carry `String` payloads so the whole enum stays `Clone`: a single
/// settlement is fanned out to every deduplicated caller, and each of them
/// gets its own copy of the terminal error.
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Network/connectivity issues (DNS, connect, broken pipe)
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Non-2xx response from the backend
    #[error("HTTP Error: status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Server-signaled throttling (HTTP 429 or equivalent)
    #[error("Rate Limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Request exceeded its configured timeout
    #[error("Timeout Error: {0}")]
    Timeout(String),

    /// Request was cancelled (engine teardown or explicit cancel)
    #[error("Request cancelled")]
    Cancelled,

    /// Malformed request (bad URL, unserializable body)
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    /// Internal bookkeeping failure (dropped channel, poisoned state)
    #[error("Internal Error: {0}")]
    Internal(String),
}

impl OptimizerError {
    /// Whether the standard retry-with-backoff path applies.
    ///
    /// Cancellation is a distinct terminal outcome and never consumes retry
    /// budget; malformed requests will not get better by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            OptimizerError::NetworkError(_)
            | OptimizerError::HttpStatus { .. }
            | OptimizerError::RateLimited { .. }
            | OptimizerError::Timeout(_) => true,
            OptimizerError::Cancelled
            | OptimizerError::InvalidRequest(_)
            | OptimizerError::Internal(_) => false,
        }
    }

    /// Whether this failure should escalate the rate limiter's backoff.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, OptimizerError::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(OptimizerError::NetworkError("reset".to_string()).is_retryable());
        assert!(OptimizerError::Timeout("30s elapsed".to_string()).is_retryable());
        assert!(OptimizerError::RateLimited { retry_after_ms: Some(5000) }.is_retryable());
        assert!(OptimizerError::HttpStatus { status: 503, message: "unavailable".to_string() }
            .is_retryable());
        assert!(!OptimizerError::Cancelled.is_retryable());
        assert!(!OptimizerError::InvalidRequest("bad url".to_string()).is_retryable());
    }

    #[test]
    fn rate_limit_detection() {
        assert!(OptimizerError::RateLimited { retry_after_ms: None }.is_rate_limit());
        assert!(!OptimizerError::NetworkError("down".to_string()).is_rate_limit());
    }
}
