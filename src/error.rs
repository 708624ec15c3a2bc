// Fetch error taxonomy shared by the cache, the acquisition backends and the
// strategy router.
//
// Two kinds are handled inside the core: retryable errors advance a fallback
// chain to its next source, terminal errors (NotFound/Suspended) stop it and
// get cached as a negative result. Everything else propagates to the caller.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The key does not exist upstream.
    #[error("not found upstream: {0}")]
    NotFound(String),

    /// The account exists but is suspended or blocked upstream.
    #[error("account suspended upstream: {0}")]
    Suspended(String),

    /// The backend refused the call because of rate limiting.
    #[error("rate limited by {0}")]
    RateLimited(String),

    /// The source had nothing to offer for this key (e.g. a durable store miss).
    #[error("{0} has no entry for this key")]
    Unavailable(String),

    /// Network failure, timeout or 5xx from a backend.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unclassified. Wrapped in an Arc so a single in-flight failure can be
    /// handed to every caller waiting on it.
    #[error("{0:#}")]
    Other(Arc<anyhow::Error>),
}

impl FetchError {
    /// Errors that move a fallback chain on to its next source.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited(_) | FetchError::Unavailable(_) | FetchError::Transient(_)
        )
    }

    /// Errors that stop a fallback chain and are cached as a negative result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::NotFound(_) | FetchError::Suspended(_))
    }

    /// Short label used for telemetry tags.
    pub fn class(&self) -> &'static str {
        match self {
            FetchError::NotFound(_) => "not_found",
            FetchError::Suspended(_) => "suspended",
            FetchError::RateLimited(_) => "rate_limited",
            FetchError::Unavailable(_) => "unavailable",
            FetchError::Transient(_) => "transient",
            FetchError::Other(_) => "error",
        }
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        FetchError::Other(Arc::new(err))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            FetchError::Transient(err.to_string())
        } else {
            FetchError::Other(Arc::new(err.into()))
        }
    }
}
