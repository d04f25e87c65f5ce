//! JSON output for the run health summary.
//!
//! The summary mirrors [`RunSummary`] plus the range it covered and when the
//! run finished, so scheduled runs can be compared over time:
//!
//! ```json
//! {"range":"1..=3","finished_at":"2025-09-03T10:15:00Z","status":"clean","summary":{...}}
//! ```

use crate::models::{PageRange, RunSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

#[derive(Debug, Serialize)]
struct SummaryReport<'a> {
    range: String,
    finished_at: DateTime<Utc>,
    status: &'static str,
    summary: &'a RunSummary,
}

/// Write `summary` to `path` as pretty-printed JSON.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn write_summary(
    summary: &RunSummary,
    range: &PageRange,
    path: impl AsRef<Path>,
) -> Result<(), Box<dyn Error>> {
    let report = SummaryReport {
        range: range.to_string(),
        finished_at: Utc::now(),
        status: summary.status(),
        summary,
    };
    let json = serde_json::to_string_pretty(&report)?;

    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(dir = %parent.display(), error = %e, "Failed to create summary dir");
                return Err(e.into());
            }
        }
    }

    fs::write(path.as_ref(), json).await?;
    info!("Wrote run summary");
    Ok(())
}
