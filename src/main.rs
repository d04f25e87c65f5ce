//! # cvpool_scrape
//!
//! Scrapes the HelloJob.az HR "CV pool" listing into a CSV file. Each
//! candidate on the requested listing pages is enriched with the phone number
//! the portal only reveals to an authenticated HR account.
//!
//! ## Usage
//!
//! ```sh
//! HELLOJOB_LOGIN=hr@example.com HELLOJOB_PASSWORD=... cvpool_scrape 1 3
//! cvpool_scrape 600 all --max-pages 200 -o ./out/tail.csv --summary ./out/tail.json
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Authenticating**: log in once and keep the session fresh
//! 2. **Fetching**: download listing pages in batches (20 at a time by default)
//! 3. **Extracting**: parse candidates out of each page
//! 4. **Enriching**: resolve phones (8 at a time by default), pausing on rate limits
//! 5. **Emitting**: append each finished batch to the CSV file

use clap::Parser;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod cli;
mod config;
mod enrich;
mod error;
mod extract;
mod fetcher;
mod models;
mod outputs;
mod pipeline;
mod portal;
mod session;
#[cfg(test)]
mod testing;
mod utils;

use cli::Cli;
use config::ScraperConfig;
use models::RunOutcome;
use outputs::{csv::CsvSink, json};
use pipeline::Pipeline;
use portal::HttpPortal;
use utils::ensure_writable_parent;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse CLI first so --verbose can pick the default filter
    let args = Cli::parse();

    // --- Tracing init ---
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("cvpool_scrape starting up");
    debug!(start = args.start, end = ?args.end, output = ?args.output, "Parsed CLI arguments");

    let range = args.resolve_range().map_err(|e| {
        error!(error = %e, "Invalid page range");
        e
    })?;
    let output = args.output_path(&range);

    // ---- Load config ----
    let mut config = match &args.config {
        Some(path) => ScraperConfig::load(path)?,
        None => ScraperConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;
    info!(
        page_concurrency = config.page_concurrency,
        phone_concurrency = config.phone_concurrency,
        termination = ?config.termination,
        detailed = config.detailed,
        "Loaded configuration"
    );

    // Early check: fail on a bad output path before logging in
    if let Err(e) = ensure_writable_parent(&output).await {
        error!(
            path = %output.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let portal = HttpPortal::new(&config)?;
    let mut sink = CsvSink::create(&output, config.detailed)?;

    // ---- Ctrl-C: finish in-flight work, flush, stop ----
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight requests");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    info!(%range, path = %output.display(), "Starting scrape");
    let summary = Pipeline::new(&portal, &config)
        .run(args.credentials(), range, &mut sink, &stop)
        .await;
    info!(rows = sink.rows(), path = %output.display(), "CSV output complete");

    if let Some(path) = &args.summary {
        if let Err(e) = json::write_summary(&summary, &range, path).await {
            error!(error = %e, "Failed to write run summary");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        status = summary.status(),
        "Execution complete"
    );

    match summary.outcome {
        RunOutcome::Aborted(reason) => Err(format!("run aborted: {reason}").into()),
        RunOutcome::Done | RunOutcome::Stopped => Ok(()),
    }
}
