//! Output writers for scraped candidates and run summaries.
//!
//! # Submodules
//!
//! - [`csv`]: streams candidate rows to a CSV file (or any `Write`)
//! - [`json`]: writes the run health summary as JSON
//!
//! The coordinator only sees the [`CandidateSink`] trait, so it emits each
//! finished batch without knowing where the rows end up.
//!
//! # Output Structure
//!
//! ```text
//! hellojob_1_to_3.csv        # phone,name,age,position,...
//! hellojob_1_to_3.json       # optional run summary
//! ```

use crate::error::SinkError;
use crate::models::Candidate;

pub mod csv;
pub mod json;

/// Destination for finished candidates, written one batch at a time.
pub trait CandidateSink {
    /// Append `candidates` in order. The header goes out before the first row.
    fn write_batch(&mut self, candidates: &[Candidate]) -> Result<(), SinkError>;

    /// Flush everything written so far; the header is emitted even when no
    /// rows were.
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Collects batches in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct VecSink {
    pub batches: Vec<Vec<Candidate>>,
    pub finished: bool,
}

#[cfg(test)]
impl VecSink {
    pub fn rows(&self) -> impl Iterator<Item = &Candidate> {
        self.batches.iter().flatten()
    }
}

#[cfg(test)]
impl CandidateSink for VecSink {
    fn write_batch(&mut self, candidates: &[Candidate]) -> Result<(), SinkError> {
        self.batches.push(candidates.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }
}
