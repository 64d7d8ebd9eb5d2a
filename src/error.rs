//! Failure classes of external collaborators
//!
//! None of these are fatal. Data errors skip the instrument for the cycle;
//! oracle errors fall back to the rule engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("empty snapshot")]
    EmptySnapshot,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FeedError {
    /// Map a transport error from reqwest into a feed failure
    pub fn from_http(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            FeedError::Timeout(timeout_ms)
        } else if err.is_decode() {
            FeedError::Malformed(err.to_string())
        } else {
            FeedError::Unavailable(err.to_string())
        }
    }
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

/// Run a collaborator call under a deadline
pub async fn with_timeout<T, F>(timeout_ms: u64, fut: F) -> FeedResult<T>
where
    F: std::future::Future<Output = FeedResult<T>>,
{
    match tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(FeedError::Timeout(timeout_ms)),
    }
}
