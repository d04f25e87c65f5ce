//! Listing page retrieval behind the page-fetch admission gate.

use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::api::{Backoff, Exhausted};
use crate::config::ScraperConfig;
use crate::error::{FetchError, RequestError};
use crate::portal::Portal;
use crate::session::Session;

/// Fetches raw listing HTML, at most `page_concurrency` pages at a time.
///
/// Timeouts, connection errors, 429 and 5xx responses are retried with
/// backoff. An expired session is reported straight back as
/// [`FetchError::AuthExpired`] so the coordinator can refresh it; any other
/// failure becomes [`FetchError::PageUnreachable`].
pub struct PageFetcher<'a, P> {
    portal: &'a P,
    gate: Semaphore,
    backoff: Backoff,
}

impl<'a, P: Portal> PageFetcher<'a, P> {
    pub fn new(portal: &'a P, config: &ScraperConfig) -> Self {
        Self {
            portal,
            gate: Semaphore::new(config.page_concurrency),
            backoff: config.backoff(config.fetch_retries),
        }
    }

    #[instrument(level = "info", skip_all, fields(page = page, generation = session.generation()))]
    pub async fn fetch(&self, session: &Session, page: u32) -> Result<String, FetchError> {
        let _permit = self.gate.acquire().await.map_err(|_| FetchError::PageUnreachable {
            page,
            attempts: 0,
            reason: "fetch gate closed".to_string(),
        })?;

        let label = format!("page {page}");
        let result = self
            .backoff
            .retry(
                &label,
                || self.portal.listing_page(session, page),
                RequestError::is_transient,
            )
            .await;

        match result {
            Ok(html) => {
                debug!(bytes = html.len(), "Fetched listing page");
                Ok(html)
            }
            Err(Exhausted {
                error: RequestError::AuthExpired,
                ..
            }) => Err(FetchError::AuthExpired { page }),
            Err(Exhausted { error, attempts }) => {
                warn!(attempts, error = %error, "Page unreachable; skipping");
                Err(FetchError::PageUnreachable {
                    page,
                    attempts,
                    reason: error.to_string(),
                })
            }
        }
    }
}
