//! CSV output for candidates.
//!
//! Columns are fixed, phone first:
//!
//! ```text
//! phone,name,age,position,salary,location,completion_percentage,posted_date,has_cv_file,cv_id,cv_url
//! ```
//!
//! Detailed mode appends `birth_date,education,languages`. Absent values are
//! written as empty strings. The writer is flushed after every batch so an
//! interrupted run still leaves every emitted row on disk.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, instrument};

use super::CandidateSink;
use crate::error::SinkError;
use crate::models::Candidate;

pub const COLUMNS: [&str; 11] = [
    "phone",
    "name",
    "age",
    "position",
    "salary",
    "location",
    "completion_percentage",
    "posted_date",
    "has_cv_file",
    "cv_id",
    "cv_url",
];

pub const DETAIL_COLUMNS: [&str; 3] = ["birth_date", "education", "languages"];

pub struct CsvSink<W: Write> {
    writer: ::csv::Writer<W>,
    detailed: bool,
    header_written: bool,
    rows: usize,
}

impl CsvSink<File> {
    /// Create (or truncate) `path`, creating parent directories as needed.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn create(path: impl AsRef<Path>, detailed: bool) -> Result<Self, SinkError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path.as_ref())?;
        info!("Opened CSV output");
        Ok(Self::new(file, detailed))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W, detailed: bool) -> Self {
        Self {
            writer: ::csv::WriterBuilder::new().from_writer(inner),
            detailed,
            header_written: false,
            rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and hand back the underlying writer.
    #[cfg(test)]
    pub fn into_inner(mut self) -> Result<W, SinkError> {
        self.finish()?;
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }

    fn header(&self) -> Vec<&'static str> {
        let mut header = COLUMNS.to_vec();
        if self.detailed {
            header.extend(DETAIL_COLUMNS);
        }
        header
    }

    fn ensure_header(&mut self) -> Result<(), SinkError> {
        if !self.header_written {
            let header = self.header();
            self.writer.write_record(&header)?;
            self.header_written = true;
        }
        Ok(())
    }
}

/// One CSV row for `c`, in [`COLUMNS`] order.
pub fn row(c: &Candidate, detailed: bool) -> Vec<String> {
    let mut row = vec![
        c.phone.clone(),
        c.name.clone(),
        c.age.map(|a| a.to_string()).unwrap_or_default(),
        c.position.clone(),
        c.salary.clone(),
        c.location.clone(),
        c.completion_percentage.clone(),
        c.posted_date.clone(),
        if c.has_cv_file { "Yes" } else { "No" }.to_string(),
        c.cv_id.clone(),
        c.cv_url.clone(),
    ];
    if detailed {
        let details = c.details.clone().unwrap_or_default();
        row.extend([details.birth_date, details.education, details.languages]);
    }
    row
}

impl<W: Write> CandidateSink for CsvSink<W> {
    fn write_batch(&mut self, candidates: &[Candidate]) -> Result<(), SinkError> {
        self.ensure_header()?;
        for c in candidates {
            self.writer.write_record(row(c, self.detailed))?;
        }
        self.writer.flush()?;
        self.rows += candidates.len();
        debug!(batch = candidates.len(), total = self.rows, "Wrote CSV rows");
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.ensure_header()?;
        self.writer.flush()?;
        Ok(())
    }
}
