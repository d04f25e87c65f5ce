//! Run coordinator: authenticate, then page through the range batch by batch.
//!
//! ```text
//! Start ─► Authenticating ─► Fetching ─► Extracting ─► Enriching ─► Emitting ─┐
//!                 │              ▲                                            │
//!                 │              └────────────── next batch ──────────────────┘
//!                 ▼
//!              Aborted            Done | Stopped | Aborted
//! ```
//!
//! Each batch is emitted whole before the next one is dispatched, so records
//! leave in page order and, within a page, in listing order. Per-page and
//! per-record failures are counted in the [`RunSummary`]; only a failed
//! (re-)authentication or a broken sink ends the run early. Whatever was
//! gathered before that point is still written out.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ScraperConfig, TerminationPolicy};
use crate::enrich::PhoneEnricher;
use crate::error::{AuthError, FetchError};
use crate::extract::extract;
use crate::fetcher::PageFetcher;
use crate::models::{Candidate, Credentials, PageRange, RunOutcome, RunSummary};
use crate::outputs::CandidateSink;
use crate::portal::Portal;
use crate::session::{Session, SessionManager};

/// Open-ended runs give up after this many consecutive batches in which
/// every page failed to download.
const MAX_FAILED_BATCHES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Start,
    Authenticating,
    Fetching,
    Extracting,
    Enriching,
    Emitting,
    Done,
    Stopped,
    Aborted,
}

/// What became of one page of a batch.
enum Fetched {
    Page(String),
    Skipped(FetchError),
    /// The session expired and could not be replaced.
    AuthLost(AuthError),
}

/// Outcome of one batch, as seen by the paging loop.
struct BatchReport {
    fetched: usize,
    empty: usize,
    aborted: Option<String>,
}

pub struct Pipeline<'a, P> {
    portal: &'a P,
    config: &'a ScraperConfig,
}

impl<'a, P: Portal> Pipeline<'a, P> {
    pub fn new(portal: &'a P, config: &'a ScraperConfig) -> Self {
        Self { portal, config }
    }

    /// Scrape `range` into `sink` and report how it went.
    ///
    /// Never fails: fatal conditions end the run with
    /// [`RunOutcome::Aborted`] after flushing what was already emitted.
    /// Setting `stop` lets in-flight requests finish, skips enrichment of
    /// the current batch, emits it, and ends with [`RunOutcome::Stopped`].
    ///
    /// # Arguments
    ///
    /// * `credentials` - HR account used for the initial login and any renewal
    /// * `range` - resolved pages to visit; open-ended ranges stop per the
    ///   configured termination policy
    /// * `sink` - receives each finished batch, then `finish()` exactly once
    /// * `stop` - operator interrupt, polled between stages
    ///
    /// # Returns
    ///
    /// The run's [`RunSummary`]: page, record and failure counters plus the
    /// terminal [`RunOutcome`].
    #[instrument(level = "info", skip_all, fields(range = %range))]
    pub async fn run(
        &self,
        credentials: Credentials,
        range: PageRange,
        sink: &mut impl CandidateSink,
        stop: &AtomicBool,
    ) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut state = RunState::Start;
        transition(&mut state, RunState::Authenticating);

        let sessions = SessionManager::new(self.portal, credentials, self.config);
        let outcome = match sessions.authenticate().await {
            Ok(_) => {
                self.page_through(&sessions, range, &mut *sink, stop, &mut summary, &mut state)
                    .await
            }
            Err(e) => {
                error!(error = %e, "Authentication failed; aborting run");
                RunOutcome::Aborted(e.to_string())
            }
        };
        summary.outcome = outcome;

        if let Err(e) = sink.finish() {
            error!(error = %e, "Failed to flush output");
            if !matches!(summary.outcome, RunOutcome::Aborted(_)) {
                summary.outcome = RunOutcome::Aborted(format!("output: {e}"));
            }
        }

        let terminal = match summary.outcome {
            RunOutcome::Done => RunState::Done,
            RunOutcome::Stopped => RunState::Stopped,
            RunOutcome::Aborted(_) => RunState::Aborted,
        };
        transition(&mut state, terminal);
        info!(
            status = summary.status(),
            pages_fetched = summary.pages_fetched,
            pages_failed = summary.pages_failed,
            records_extracted = summary.records_extracted,
            records_enriched = summary.records_enriched,
            enrichment_failures = summary.enrichment_failures,
            parse_failures = summary.parse_failures,
            duplicates = summary.duplicates,
            records_emitted = summary.records_emitted,
            logins = sessions.logins(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );
        summary
    }

    #[allow(clippy::too_many_arguments)]
    async fn page_through(
        &self,
        sessions: &SessionManager<'_, P>,
        range: PageRange,
        sink: &mut impl CandidateSink,
        stop: &AtomicBool,
        summary: &mut RunSummary,
        state: &mut RunState,
    ) -> RunOutcome {
        let fetcher = PageFetcher::new(self.portal, self.config);
        let enricher = PhoneEnricher::new(self.portal, sessions, self.config);
        let batch_size = if range.is_open_ended() {
            self.config.all_pages_batch
        } else {
            self.config.page_concurrency
        };

        let mut emitted: HashSet<String> = HashSet::new();
        let mut failed_batches = 0;
        // `None` once the last representable page has been dispatched.
        let mut next = Some(range.start);

        while let Some(pages) = next.and_then(|from| range.batch(from, batch_size)) {
            if stop.load(Ordering::Relaxed) {
                info!(next_page = pages[0], "Stop requested; no further pages dispatched");
                return RunOutcome::Stopped;
            }
            next = next.and_then(|from| from.checked_add(pages.len() as u32));

            let session = match sessions.ensure_valid().await {
                Ok(current) => current,
                Err(e) => {
                    error!(error = %e, "Re-authentication failed; aborting run");
                    return RunOutcome::Aborted(e.to_string());
                }
            };

            let report = match self
                .run_batch(&fetcher, &enricher, sessions, &session, &pages, &mut emitted, &mut *sink, stop, summary, state)
                .await
            {
                Ok(report) => report,
                Err(outcome) => return outcome,
            };

            if let Some(reason) = report.aborted {
                return RunOutcome::Aborted(reason);
            }
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested; batch flushed");
                return RunOutcome::Stopped;
            }

            if range.is_open_ended() {
                if self.reached_end(&report, pages.len()) {
                    info!(last_page = pages.last().copied(), policy = ?self.config.termination, "No more records; stopping");
                    return RunOutcome::Done;
                }
                failed_batches = if report.fetched == 0 { failed_batches + 1 } else { 0 };
                if failed_batches >= MAX_FAILED_BATCHES {
                    error!(failed_batches, "Every page of the last batches failed; giving up");
                    return RunOutcome::Aborted(format!(
                        "{failed_batches} consecutive batches unreachable"
                    ));
                }
            }
        }
        RunOutcome::Done
    }

    /// Fetch, extract, enrich and emit one batch of pages.
    ///
    /// `Err` carries a terminal outcome when the sink refuses the batch.
    #[allow(clippy::too_many_arguments)]
    #[instrument(level = "info", skip_all, fields(first = pages.first().copied(), last = pages.last().copied()))]
    async fn run_batch(
        &self,
        fetcher: &PageFetcher<'_, P>,
        enricher: &PhoneEnricher<'_, P>,
        sessions: &SessionManager<'_, P>,
        session: &Arc<Session>,
        pages: &[u32],
        emitted: &mut HashSet<String>,
        sink: &mut impl CandidateSink,
        stop: &AtomicBool,
        summary: &mut RunSummary,
        state: &mut RunState,
    ) -> Result<BatchReport, RunOutcome> {
        transition(state, RunState::Fetching);
        let fetched: Vec<(u32, Fetched)> = stream::iter(pages.iter().copied())
            .map(|page| async move { (page, fetch_page(fetcher, sessions, session, page).await) })
            .buffered(pages.len().max(1))
            .collect()
            .await;

        transition(state, RunState::Extracting);
        let mut report = BatchReport {
            fetched: 0,
            empty: 0,
            aborted: None,
        };
        let mut batch: Vec<Candidate> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (page, outcome) in fetched {
            let html = match outcome {
                Fetched::Page(html) => html,
                Fetched::Skipped(e) => {
                    warn!(page, error = %e, "Skipping page");
                    summary.pages_failed += 1;
                    continue;
                }
                Fetched::AuthLost(e) => {
                    error!(page, error = %e, "Session could not be renewed");
                    summary.pages_failed += 1;
                    report.aborted.get_or_insert_with(|| e.to_string());
                    continue;
                }
            };
            summary.pages_fetched += 1;
            report.fetched += 1;

            let extraction = extract(&html, page, self.portal.base_url());
            summary.parse_failures += extraction.failures.len();
            summary.records_extracted += extraction.candidates.len();
            if extraction.is_empty() {
                info!(page = extraction.page, "Page yielded no records");
                report.empty += 1;
            }

            for candidate in extraction.candidates {
                if emitted.contains(&candidate.cv_id) {
                    debug!(cv_id = %candidate.cv_id, page, "Already emitted; dropping repeat");
                    summary.duplicates += 1;
                    continue;
                }
                match positions.get(&candidate.cv_id) {
                    Some(&pos) => {
                        summary.duplicates += 1;
                        batch[pos].merge(candidate);
                    }
                    None => {
                        positions.insert(candidate.cv_id.clone(), batch.len());
                        batch.push(candidate);
                    }
                }
            }
        }

        if report.aborted.is_none() && !stop.load(Ordering::Relaxed) && !batch.is_empty() {
            transition(state, RunState::Enriching);
            match sessions.ensure_valid().await {
                Ok(current) => {
                    let (enriched, stats) = enricher.enrich_all(&current, batch, stop).await;
                    summary.records_enriched += stats.enriched;
                    summary.enrichment_failures += stats.failures;
                    batch = enriched;
                }
                Err(e) => {
                    error!(error = %e, "Re-authentication failed before enrichment");
                    report.aborted = Some(e.to_string());
                }
            }
        } else if !batch.is_empty() {
            info!(records = batch.len(), "Emitting batch without phone enrichment");
        }

        transition(state, RunState::Emitting);
        if let Err(e) = sink.write_batch(&batch) {
            error!(error = %e, "Failed to write batch; aborting run");
            return Err(RunOutcome::Aborted(format!("output: {e}")));
        }
        summary.records_emitted += batch.len();
        let with_phone = batch.iter().filter(|c| c.has_phone()).count();
        emitted.extend(batch.into_iter().map(|c| c.cv_id));
        info!(
            pages = pages.len(),
            fetched = report.fetched,
            empty = report.empty,
            with_phone,
            emitted = summary.records_emitted,
            "Batch emitted"
        );
        Ok(report)
    }

    fn reached_end(&self, report: &BatchReport, batch_len: usize) -> bool {
        match self.config.termination {
            TerminationPolicy::FirstEmptyPage => report.empty > 0,
            TerminationPolicy::EmptyBatch => report.empty == batch_len,
        }
    }
}

/// Fetch one page, renewing the session once if the portal rejects it.
async fn fetch_page<P: Portal>(
    fetcher: &PageFetcher<'_, P>,
    sessions: &SessionManager<'_, P>,
    session: &Arc<Session>,
    page: u32,
) -> Fetched {
    match fetcher.fetch(session, page).await {
        Ok(html) => Fetched::Page(html),
        Err(FetchError::AuthExpired { .. }) => {
            let renewed = match sessions.refresh(session).await {
                Ok(renewed) => renewed,
                Err(e) => return Fetched::AuthLost(e),
            };
            debug!(page, generation = renewed.generation(), "Retrying page with renewed session");
            match fetcher.fetch(&renewed, page).await {
                Ok(html) => Fetched::Page(html),
                Err(e) => Fetched::Skipped(e),
            }
        }
        Err(e) => Fetched::Skipped(e),
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = ?*state, to = ?next, "Run state");
    *state = next;
}
