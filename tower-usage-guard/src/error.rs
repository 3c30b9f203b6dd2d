use std::time::Duration;

/// Errors produced by the guard middleware stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardError {
    /// Every slot for the guarded resource is taken; the protected work did not run.
    ///
    /// The duration indicates when the client should retry.
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with `Retry-After` and `retry-after-ms` headers.
    #[error("Too many requests; retry after {}ms", .retry_after.as_millis())]
    Saturated {
        /// The duration to wait before retrying.
        retry_after: Duration,
    },

    /// The protected work ran past the deadline set on the managed stack.
    ///
    /// Its slot has been released. When the `axum` feature is enabled, this
    /// converts to `408 Request Timeout`.
    #[error("Request timed out while holding a concurrency slot")]
    Timeout,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl GuardError {
    /// The advisory wait, if this error is a refusal.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Saturated { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<usage_guard::Reason> for GuardError {
    fn from(reason: usage_guard::Reason) -> Self {
        match reason {
            usage_guard::Reason::Saturated { retry_after } => Self::Saturated { retry_after },
        }
    }
}

/// Header carrying the exact retry hint in milliseconds.
pub const RETRY_AFTER_MS: &str = "retry-after-ms";

/// Converts a retry hint to whole seconds for a `Retry-After` header, rounding up
/// so clients never come back early.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    (retry_after.as_millis() as u64).div_ceil(1000)
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GuardError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::HeaderName;
        use axum::http::HeaderValue;
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string(), vec![]),
            Self::Saturated { retry_after } => {
                let secs = HeaderValue::from(retry_after_secs(retry_after));
                let millis = HeaderValue::from(retry_after.as_millis() as u64);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    vec![
                        (axum::http::header::RETRY_AFTER, secs),
                        (HeaderName::from_static(RETRY_AFTER_MS), millis),
                    ],
                )
            }
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), vec![]),
        };

        let mut response = (status, msg).into_response();
        for (name, value) in headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturated_message_mentions_retry() {
        let err = GuardError::Saturated {
            retry_after: Duration::from_millis(1000),
        };
        assert_eq!(err.to_string(), "Too many requests; retry after 1000ms");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
        assert_eq!(GuardError::Timeout.retry_after(), None);
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::ZERO), 0);
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1000)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1001)), 2);
    }

    #[test]
    fn converts_from_reason() {
        let reason = usage_guard::Reason::Saturated {
            retry_after: Duration::from_millis(250),
        };
        assert!(matches!(
            GuardError::from(reason),
            GuardError::Saturated { retry_after } if retry_after == Duration::from_millis(250)
        ));
    }

    #[cfg(feature = "axum")]
    #[test]
    fn saturated_maps_to_429_with_headers() {
        use axum::response::IntoResponse;

        let resp = GuardError::Saturated {
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(resp.status(), http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[http::header::RETRY_AFTER], "2");
        assert_eq!(resp.headers()[RETRY_AFTER_MS], "1500");
    }
}
