//! Error types for the reqwest-proxy-dispatch crate.

use crate::proxy::ProxyType;
use http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by a [`Transport`](crate::transport::Transport).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a single request through a single proxy failed.
///
/// Attempt errors are recorded as proxy failures and only reach the caller
/// wrapped in a [`DispatchError`].
#[derive(Debug, Error)]
pub enum AttemptError {
    /// No transport can be built for this proxy type.
    #[error("{0} proxies are not supported")]
    UnsupportedProxyType(ProxyType),
    /// The transport failed before a response was received.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    /// A response was received, but its status is not an accepted one.
    #[error("status code: {0}")]
    BadStatus(StatusCode),
    /// The attempt did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Terminal failure of a dispatched request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No proxy was ever available and no fallback transport is configured.
    #[error("no proxies available and no fallback transport configured")]
    NoProxyAvailable,
    /// Every proxy attempt failed and no fallback transport is configured.
    #[error("all {attempts} proxy attempts failed, last error: {source}")]
    AllAttemptsFailed {
        attempts: usize,
        #[source]
        source: AttemptError,
    },
    /// The fallback transport failed after the proxies were exhausted.
    #[error("{}", fallback_failure(*.attempts, .last.as_ref(), .source))]
    FallbackFailed {
        attempts: usize,
        last: Option<AttemptError>,
        #[source]
        source: BoxError,
    },
    /// The request has a streaming body and cannot be replayed across attempts.
    #[error("request object is not cloneable, is a streaming body being sent?")]
    RequestNotCloneable,
}

impl DispatchError {
    /// Whether any proxy was tried before the request failed.
    pub fn proxies_attempted(&self) -> bool {
        match self {
            DispatchError::AllAttemptsFailed { .. } => true,
            DispatchError::FallbackFailed { attempts, .. } => *attempts > 0,
            _ => false,
        }
    }

    /// Whether the fallback transport was tried before the request failed.
    pub fn fallback_attempted(&self) -> bool {
        matches!(self, DispatchError::FallbackFailed { .. })
    }
}

fn fallback_failure(attempts: usize, last: Option<&AttemptError>, fallback: &BoxError) -> String {
    match last {
        Some(last) if attempts > 0 => format!(
            "all {} proxy attempts failed (last proxy error: {}), \
             fallback transport also failed: {}",
            attempts, last, fallback
        ),
        _ => format!("no proxies available, fallback transport failed: {}", fallback),
    }
}

/// Why a candidate proxy was rejected by the validator.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The candidate does not accept TCP connections.
    #[error("{address} is unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: std::io::Error,
    },
    /// The TCP pre-check or the test request timed out.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    /// The test request through the candidate failed.
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    /// The test URL answered with something other than 200.
    #[error("test URL answered {0}")]
    BadStatus(StatusCode),
    /// The configured test URL cannot be parsed.
    #[error("invalid test URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Failure of a candidate source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch proxy list: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to read proxy list: {0}")]
    Io(#[from] std::io::Error),
    #[error("no candidates found in {0}")]
    Empty(String),
}
