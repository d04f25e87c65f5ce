//! Error taxonomy for a scrape run.
//!
//! Transport failures surface from the [`Portal`](crate::portal::Portal) seam
//! as a single [`RequestError`]. Each pipeline stage maps it into its own
//! error type, and only [`AuthError`] is allowed to end a run.
//!
//! | Error | Raised by | Effect on the run |
//! |-------|-----------|-------------------|
//! | [`AuthError`] | session manager | fatal, run ends `Aborted` |
//! | [`FetchError`] | page fetcher | page skipped and counted |
//! | [`EnrichError`] | phone enricher | phone left empty and counted |
//! | [`ParseFailure`] | record extractor | record dropped and counted |

use thiserror::Error;

/// A failed call against one of the portal's HTTP endpoints.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The session cookie or XSRF token is no longer accepted.
    #[error("session expired")]
    AuthExpired,
    /// The server refused the credentials outright.
    #[error("credentials rejected: {0}")]
    Rejected(String),
    #[error("rate limited")]
    RateLimited,
    #[error("not found")]
    NotFound,
    #[error("timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    /// The server answered, but not with anything we know how to read.
    #[error("unexpected response: {0}")]
    UnexpectedShape(String),
}

impl RequestError {
    /// Whether retrying the same call after a backoff may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::Timeout | RequestError::Network(_) | RequestError::RateLimited => true,
            RequestError::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RequestError::Timeout
        } else if let Some(status) = e.status() {
            RequestError::Status(status.as_u16())
        } else if e.is_decode() {
            RequestError::UnexpectedShape(e.to_string())
        } else {
            RequestError::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for RequestError {
    fn from(e: url::ParseError) -> Self {
        RequestError::UnexpectedShape(format!("bad url: {e}"))
    }
}

/// Fatal authentication failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("network failure during login after {attempts} attempts: {reason}")]
    NetworkFailure { attempts: usize, reason: String },
    #[error("unexpected login response: {0}")]
    UnexpectedResponseShape(String),
}

impl AuthError {
    pub(crate) fn from_request(e: RequestError, attempts: usize) -> Self {
        match e {
            RequestError::Rejected(msg) => AuthError::InvalidCredentials(msg),
            RequestError::UnexpectedShape(msg) => AuthError::UnexpectedResponseShape(msg),
            RequestError::Status(code) if code < 500 && code != 429 => {
                AuthError::UnexpectedResponseShape(format!("login returned status {code}"))
            }
            RequestError::AuthExpired | RequestError::NotFound => {
                AuthError::UnexpectedResponseShape(e.to_string())
            }
            other => AuthError::NetworkFailure {
                attempts,
                reason: other.to_string(),
            },
        }
    }
}

/// Per-page failure. Never ends the run on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The session was rejected; the coordinator refreshes it and retries once.
    #[error("session expired while fetching page {page}")]
    AuthExpired { page: u32 },
    #[error("page {page} unreachable after {attempts} attempts: {reason}")]
    PageUnreachable {
        page: u32,
        attempts: usize,
        reason: String,
    },
}

/// Per-record enrichment failure. The candidate is still emitted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnrichError {
    #[error("no phone available")]
    NotFound,
    #[error("phone lookup rate limited")]
    RateLimited,
    #[error("phone lookup failed: {0}")]
    NetworkFailure(String),
}

impl From<RequestError> for EnrichError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::NotFound => EnrichError::NotFound,
            RequestError::RateLimited => EnrichError::RateLimited,
            other => EnrichError::NetworkFailure(other.to_string()),
        }
    }
}

/// A listing item that could not be turned into a candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("item {index} on page {page} has no cv id")]
    MissingId { page: u32, index: usize },
    #[error("item {index} on page {page} has a malformed cv id {raw:?}")]
    MalformedId { page: u32, index: usize, raw: String },
}

/// Output sink failure. Treated like a fatal error by the coordinator.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RequestError::Timeout.is_transient());
        assert!(RequestError::Network("reset".into()).is_transient());
        assert!(RequestError::Status(503).is_transient());
        assert!(!RequestError::Status(404).is_transient());
        assert!(!RequestError::AuthExpired.is_transient());
        assert!(!RequestError::Rejected("nope".into()).is_transient());
    }

    #[test]
    fn test_auth_error_mapping() {
        assert_eq!(
            AuthError::from_request(RequestError::Rejected("bad password".into()), 1),
            AuthError::InvalidCredentials("bad password".into())
        );
        assert!(matches!(
            AuthError::from_request(RequestError::Timeout, 4),
            AuthError::NetworkFailure { attempts: 4, .. }
        ));
        assert!(matches!(
            AuthError::from_request(RequestError::Status(400), 1),
            AuthError::UnexpectedResponseShape(_)
        ));
    }

    #[test]
    fn test_enrich_error_mapping() {
        assert_eq!(EnrichError::from(RequestError::NotFound), EnrichError::NotFound);
        assert_eq!(EnrichError::from(RequestError::RateLimited), EnrichError::RateLimited);
        assert!(matches!(
            EnrichError::from(RequestError::Status(500)),
            EnrichError::NetworkFailure(_)
        ));
    }
}
