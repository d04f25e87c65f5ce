//! Phone number enrichment behind its own, lower admission gate.
//!
//! Each candidate gets one call to the show-phone endpoint. Failures never
//! escape [`PhoneEnricher::enrich_all`]: the candidate keeps an empty phone
//! and the failure is counted. A rate-limited reply pauses every lookup that
//! has not yet gone out, instead of aborting the queue.
//!
//! # Scheduling
//!
//! ```text
//! batch 1 (phone_batch_size) ──► wait phone_batch_delay ──► batch 2 ──► ...
//!   └─ at most phone_concurrency lookups in flight
//! ```

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::api::{Backoff, Exhausted};
use crate::config::ScraperConfig;
use crate::error::{EnrichError, RequestError};
use crate::extract::extract_details;
use crate::models::Candidate;
use crate::portal::Portal;
use crate::session::{Session, SessionManager};

/// Outcome counters for one call to [`PhoneEnricher::enrich_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    pub enriched: usize,
    pub failures: usize,
    pub not_found: usize,
    pub rate_limited: usize,
    /// Candidates left untouched because a stop was requested.
    pub skipped: usize,
}

impl EnrichStats {
    fn record(&mut self, result: &Result<(), EnrichError>) {
        match result {
            Ok(()) => self.enriched += 1,
            Err(e) => {
                self.failures += 1;
                match e {
                    EnrichError::NotFound => self.not_found += 1,
                    EnrichError::RateLimited => self.rate_limited += 1,
                    EnrichError::NetworkFailure(_) => {}
                }
            }
        }
    }
}

pub struct PhoneEnricher<'a, P> {
    portal: &'a P,
    sessions: &'a SessionManager<'a, P>,
    gate: Semaphore,
    concurrency: usize,
    backoff: Backoff,
    batch_size: usize,
    batch_delay: Duration,
    rate_limit_pause: Duration,
    resume_at: Mutex<Option<Instant>>,
    detailed: bool,
}

impl<'a, P: Portal> PhoneEnricher<'a, P> {
    pub fn new(portal: &'a P, sessions: &'a SessionManager<'a, P>, config: &ScraperConfig) -> Self {
        Self {
            portal,
            sessions,
            gate: Semaphore::new(config.phone_concurrency),
            concurrency: config.phone_concurrency,
            backoff: config.backoff(config.enrich_retries),
            batch_size: config.phone_batch_size,
            batch_delay: config.phone_batch_delay(),
            rate_limit_pause: config.rate_limit_pause(),
            resume_at: Mutex::new(None),
            detailed: config.detailed,
        }
    }

    /// Resolve the phone of a single candidate.
    ///
    /// Waits for a slot on the enrichment gate and for any rate-limit pause
    /// still in force. A rate-limited reply starts a new pause for everyone.
    #[instrument(level = "debug", skip_all, fields(cv_id = %candidate.cv_id))]
    pub async fn enrich(
        &self,
        session: &Arc<Session>,
        mut candidate: Candidate,
    ) -> Result<Candidate, EnrichError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| EnrichError::NetworkFailure("enrichment gate closed".to_string()))?;
        self.wait_out_pause().await;

        match self.lookup(session, &candidate.cv_id).await {
            Ok(phone) => {
                debug!(%phone, "Resolved phone");
                candidate.phone = phone;
                Ok(candidate)
            }
            Err(EnrichError::RateLimited) => {
                warn!(pause = ?self.rate_limit_pause, "Phone lookup rate limited; pausing queue");
                self.pause();
                Err(EnrichError::RateLimited)
            }
            Err(e) => {
                debug!(error = %e, "No phone for candidate");
                Err(e)
            }
        }
    }

    /// Enrich `candidates` in batches, preserving their order.
    ///
    /// Every input candidate comes back, with or without a phone. Once `stop`
    /// is set, no further batch is dispatched and the rest are returned as-is.
    ///
    /// # Arguments
    ///
    /// * `session` - session to call show-phone with; renewed through the
    ///   session manager if the portal rejects it
    /// * `candidates` - records to enrich, in output order
    /// * `stop` - checked before each batch of `phone_batch_size` lookups
    ///
    /// # Returns
    ///
    /// The candidates in input order and the [`EnrichStats`] for this call.
    #[instrument(level = "info", skip_all, fields(count = candidates.len()))]
    pub async fn enrich_all(
        &self,
        session: &Arc<Session>,
        candidates: Vec<Candidate>,
        stop: &AtomicBool,
    ) -> (Vec<Candidate>, EnrichStats) {
        let total = candidates.len();
        let mut stats = EnrichStats::default();
        let mut out = Vec::with_capacity(total);

        let batches = candidates.into_iter().chunks(self.batch_size);
        for (i, batch) in batches.into_iter().enumerate() {
            let batch: Vec<Candidate> = batch.collect();
            if stop.load(Ordering::Relaxed) {
                stats.skipped += batch.len();
                out.extend(batch);
                continue;
            }
            if i > 0 {
                sleep(self.batch_delay).await;
            }

            let results: Vec<(Candidate, Result<(), EnrichError>)> = stream::iter(batch)
                .map(|candidate| async move {
                    let fallback = candidate.clone();
                    let (mut candidate, result) = match self.enrich(session, candidate).await {
                        Ok(enriched) => (enriched, Ok(())),
                        Err(e) => (fallback, Err(e)),
                    };
                    if self.detailed {
                        self.add_details(session, &mut candidate).await;
                    }
                    (candidate, result)
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            for (candidate, result) in results {
                stats.record(&result);
                out.push(candidate);
            }
            debug!(done = out.len(), total, "Phone batch finished");
        }

        info!(
            enriched = stats.enriched,
            failures = stats.failures,
            not_found = stats.not_found,
            rate_limited = stats.rate_limited,
            skipped = stats.skipped,
            "Phone enrichment finished"
        );
        (out, stats)
    }

    /// Call show-phone, refreshing the session once if it expired.
    async fn lookup(&self, session: &Arc<Session>, cv_id: &str) -> Result<String, EnrichError> {
        let mut current = Arc::clone(session);
        for attempt in 0..2 {
            let label = format!("phone {cv_id}");
            let result = self
                .backoff
                .retry(
                    &label,
                    || self.portal.show_phone(&current, cv_id),
                    |e: &RequestError| e.is_transient() && *e != RequestError::RateLimited,
                )
                .await;

            match result {
                Ok(phone) => return Ok(phone),
                Err(Exhausted {
                    error: RequestError::AuthExpired,
                    ..
                }) if attempt == 0 => {
                    current = self
                        .sessions
                        .refresh(&current)
                        .await
                        .map_err(|e| EnrichError::NetworkFailure(e.to_string()))?;
                }
                Err(Exhausted { error, .. }) => return Err(error.into()),
            }
        }
        Err(EnrichError::NetworkFailure("session expired again after refresh".to_string()))
    }

    async fn add_details(&self, session: &Session, candidate: &mut Candidate) {
        let Ok(_permit) = self.gate.acquire().await else {
            return;
        };
        let label = format!("cv {}", candidate.cv_id);
        let result = self
            .backoff
            .retry(
                &label,
                || self.portal.cv_page(session, &candidate.cv_id),
                RequestError::is_transient,
            )
            .await;
        match result {
            Ok(html) => {
                let details = extract_details(&html);
                if details.is_empty() {
                    debug!("CV page carried none of the detail fields");
                }
                candidate.details = Some(details);
            }
            Err(Exhausted { error, .. }) => {
                warn!(error = %error, "CV page unavailable; details left empty");
            }
        }
    }

    fn pause(&self) {
        let until = Instant::now() + self.rate_limit_pause;
        let mut slot = match self.resume_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(slot.map_or(until, |current| current.max(until)));
    }

    async fn wait_out_pause(&self) {
        let until = match self.resume_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if let Some(until) = until {
            if until > Instant::now() {
                debug!("Waiting out rate-limit pause");
                sleep_until(until).await;
            }
        }
    }
}
