//! Authenticated session state and its single writer.
//!
//! A [`Session`] is an immutable snapshot: the XSRF token the portal handed
//! out, when it was obtained, and a generation number. Fetchers and
//! enrichers hold an `Arc<Session>` for the duration of one call.
//!
//! [`SessionManager`] is the only place a session is created or replaced.
//! Concurrent callers that all saw the same session expire funnel through
//! [`SessionManager::refresh`], and only the first of them logs in again;
//! the rest receive the newer generation.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::api::Backoff;
use crate::config::ScraperConfig;
use crate::error::{AuthError, RequestError};
use crate::models::Credentials;
use crate::portal::Portal;

#[derive(Debug, Clone)]
pub struct Session {
    xsrf_token: String,
    authenticated_at: DateTime<Utc>,
    started: Instant,
    generation: u64,
}

impl Session {
    pub fn new(xsrf_token: impl Into<String>, generation: u64) -> Self {
        Self {
            xsrf_token: xsrf_token.into(),
            authenticated_at: Utc::now(),
            started: Instant::now(),
            generation,
        }
    }

    pub fn xsrf_token(&self) -> &str {
        &self.xsrf_token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn authenticated_at(&self) -> DateTime<Utc> {
        self.authenticated_at
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.started.elapsed() >= max_age
    }
}

/// Owns the current [`Session`] and re-authenticates on demand.
pub struct SessionManager<'a, P> {
    portal: &'a P,
    credentials: Credentials,
    backoff: Backoff,
    max_age: Duration,
    current: Mutex<Option<Arc<Session>>>,
    logins: AtomicUsize,
}

impl<'a, P: Portal> SessionManager<'a, P> {
    pub fn new(portal: &'a P, credentials: Credentials, config: &ScraperConfig) -> Self {
        Self {
            portal,
            credentials,
            backoff: config.backoff(config.auth_retries),
            max_age: config.session_max_age(),
            current: Mutex::new(None),
            logins: AtomicUsize::new(0),
        }
    }

    /// Log in from scratch, replacing any current session.
    ///
    /// Transient network failures are retried with backoff; everything else,
    /// and exhausted retries, is returned as a fatal [`AuthError`].
    ///
    /// # Returns
    ///
    /// The new [`Session`], one generation past the one it replaces.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] when the portal refuses the account
    /// - [`AuthError::NetworkFailure`] once retries are exhausted
    /// - [`AuthError::UnexpectedResponseShape`] when the login page or reply
    ///   cannot be understood
    #[instrument(level = "info", skip_all)]
    pub async fn authenticate(&self) -> Result<Arc<Session>, AuthError> {
        let mut slot = self.current.lock().await;
        self.login_locked(&mut slot).await
    }

    /// The current session, logging in again first if it is missing or older
    /// than the configured maximum age.
    pub async fn ensure_valid(&self) -> Result<Arc<Session>, AuthError> {
        let mut slot = self.current.lock().await;
        match slot.as_ref() {
            Some(session) if !session.is_stale(self.max_age) => Ok(Arc::clone(session)),
            Some(session) => {
                info!(
                    generation = session.generation,
                    authenticated_at = %session.authenticated_at(),
                    "Session is stale; re-authenticating"
                );
                self.login_locked(&mut slot).await
            }
            None => self.login_locked(&mut slot).await,
        }
    }

    /// Replace `stale` after a downstream call reported it expired.
    ///
    /// If another task already replaced it, the newer session is returned
    /// without logging in again.
    ///
    /// # Arguments
    ///
    /// * `stale` - the session the failing call was made with
    #[instrument(level = "info", skip_all, fields(stale_generation = stale.generation))]
    pub async fn refresh(&self, stale: &Session) -> Result<Arc<Session>, AuthError> {
        let mut slot = self.current.lock().await;
        if let Some(current) = slot.as_ref() {
            if current.generation > stale.generation {
                return Ok(Arc::clone(current));
            }
        }
        warn!("Session expired; re-authenticating");
        self.login_locked(&mut slot).await
    }

    /// Number of successful logins so far.
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::Relaxed)
    }

    async fn login_locked(&self, slot: &mut Option<Arc<Session>>) -> Result<Arc<Session>, AuthError> {
        let generation = slot.as_ref().map(|s| s.generation + 1).unwrap_or(1);
        let token = self
            .backoff
            .retry(
                "login",
                || self.portal.login(&self.credentials),
                RequestError::is_transient,
            )
            .await
            .map_err(|e| AuthError::from_request(e.error, e.attempts))?;

        let session = Arc::new(Session::new(token, generation));
        *slot = Some(Arc::clone(&session));
        self.logins.fetch_add(1, Ordering::Relaxed);
        info!(generation, email = %self.credentials.email, "Authenticated");
        Ok(session)
    }
}
