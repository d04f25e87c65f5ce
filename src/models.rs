//! Data models for candidates, page ranges and run summaries.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`Candidate`]: one entry from the CV pool listing, later enriched with a phone
//! - [`CandidateDetails`]: extra fields read from the CV page in detailed mode
//! - [`PageRange`]: the resolved set of listing pages a run covers
//! - [`RunSummary`]: the run's health counters and terminal outcome
//!
//! `cv_id` is the identity of a candidate. Two records with the same `cv_id`
//! are combined with [`Candidate::merge`], which never blanks a populated field.

use serde::Serialize;
use std::fmt;

/// One candidate as listed in the CV pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Listing identity (`data-id` of the item).
    pub cv_id: String,
    /// Absolute URL of the candidate's CV page.
    pub cv_url: String,
    pub name: String,
    pub position: String,
    pub salary: String,
    pub location: String,
    pub posted_date: String,
    pub completion_percentage: String,
    pub age: Option<u32>,
    pub has_cv_file: bool,
    /// Empty until enrichment succeeds.
    pub phone: String,
    /// Only populated in detailed mode.
    pub details: Option<CandidateDetails>,
}

/// Fields only present on the full CV page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CandidateDetails {
    pub birth_date: String,
    pub education: String,
    pub languages: String,
}

impl CandidateDetails {
    pub fn is_empty(&self) -> bool {
        self.birth_date.is_empty() && self.education.is_empty() && self.languages.is_empty()
    }

    fn merge(&mut self, other: CandidateDetails) {
        fill(&mut self.birth_date, other.birth_date);
        fill(&mut self.education, other.education);
        fill(&mut self.languages, other.languages);
    }
}

/// Overwrite `slot` only when `value` carries something.
fn fill(slot: &mut String, value: String) {
    if !value.trim().is_empty() {
        *slot = value;
    }
}

impl Candidate {
    /// Create an empty candidate for `cv_id` with its CV URL derived from `base_url`.
    pub fn new(cv_id: impl Into<String>, base_url: &str) -> Self {
        let cv_id = cv_id.into();
        let cv_url = cv_url(base_url, &cv_id);
        Self {
            cv_id,
            cv_url,
            ..Default::default()
        }
    }

    /// Fold a later observation of the same candidate into this one.
    ///
    /// Non-empty fields in `other` win; empty ones never blank what is
    /// already here. `has_cv_file` is sticky once true.
    pub fn merge(&mut self, other: Candidate) {
        debug_assert_eq!(self.cv_id, other.cv_id);
        fill(&mut self.cv_url, other.cv_url);
        fill(&mut self.name, other.name);
        fill(&mut self.position, other.position);
        fill(&mut self.salary, other.salary);
        fill(&mut self.location, other.location);
        fill(&mut self.posted_date, other.posted_date);
        fill(&mut self.completion_percentage, other.completion_percentage);
        fill(&mut self.phone, other.phone);
        if other.age.is_some() {
            self.age = other.age;
        }
        self.has_cv_file |= other.has_cv_file;
        if let Some(theirs) = other.details {
            match self.details.as_mut() {
                Some(mine) => mine.merge(theirs),
                None => self.details = Some(theirs),
            }
        }
    }

    pub fn has_phone(&self) -> bool {
        !self.phone.is_empty()
    }
}

/// Build the CV page URL for `cv_id`.
pub fn cv_url(base_url: &str, cv_id: &str) -> String {
    format!("{}/hr/cv-pool/cv/{}", base_url.trim_end_matches('/'), cv_id)
}

/// Where a run stops paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEnd {
    /// Inclusive last page.
    Page(u32),
    /// Keep going until the termination policy fires.
    All,
}

/// Resolved page range for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: u32,
    pub end: PageEnd,
    /// Upper bound on the number of pages dispatched, whatever `end` says.
    pub max_pages: Option<u32>,
}

impl PageRange {
    pub fn bounded(start: u32, end: u32) -> Self {
        Self {
            start,
            end: PageEnd::Page(end),
            max_pages: None,
        }
    }

    pub fn all_from(start: u32) -> Self {
        Self {
            start,
            end: PageEnd::All,
            max_pages: None,
        }
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn is_open_ended(&self) -> bool {
        self.end == PageEnd::All
    }

    /// Last page this range may dispatch, if it is bounded at all.
    pub fn last_page(&self) -> Option<u32> {
        let cap = self
            .max_pages
            .map(|n| self.start.saturating_add(n.saturating_sub(1)));
        match (self.end, cap) {
            (PageEnd::Page(end), Some(cap)) => Some(end.min(cap)),
            (PageEnd::Page(end), None) => Some(end),
            (PageEnd::All, cap) => cap,
        }
    }

    /// The next batch of at most `size` pages starting at `from`, or `None`
    /// once the range is exhausted.
    pub fn batch(&self, from: u32, size: usize) -> Option<Vec<u32>> {
        if from < self.start {
            return None;
        }
        if self.max_pages == Some(0) {
            return None;
        }
        let size = size.max(1) as u32;
        let upper = from.saturating_add(size - 1);
        let upper = match self.last_page() {
            Some(last) if from > last => return None,
            Some(last) => upper.min(last),
            None => upper,
        };
        Some((from..=upper).collect())
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            PageEnd::Page(end) => write!(f, "{}..={}", self.start, end)?,
            PageEnd::All => write!(f, "{}..=all", self.start)?,
        }
        if let Some(max) = self.max_pages {
            write!(f, " (max {max} pages)")?;
        }
        Ok(())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Range exhausted or the termination policy fired.
    Done,
    /// Operator interrupt; everything gathered so far was flushed.
    Stopped,
    /// Fatal error (authentication or output sink).
    Aborted(String),
}

/// Health counters for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub records_extracted: usize,
    pub records_enriched: usize,
    pub enrichment_failures: usize,
    pub parse_failures: usize,
    pub duplicates: usize,
    pub records_emitted: usize,
    pub outcome: RunOutcome,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            pages_fetched: 0,
            pages_failed: 0,
            records_extracted: 0,
            records_enriched: 0,
            enrichment_failures: 0,
            parse_failures: 0,
            duplicates: 0,
            records_emitted: 0,
            outcome: RunOutcome::Done,
        }
    }
}

impl RunSummary {
    /// `true` when the run finished and nothing along the way failed.
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Done
            && self.pages_failed == 0
            && self.enrichment_failures == 0
            && self.parse_failures == 0
    }

    pub fn status(&self) -> &'static str {
        match (&self.outcome, self.is_clean()) {
            (RunOutcome::Aborted(_), _) => "aborted",
            (RunOutcome::Stopped, _) => "stopped",
            (RunOutcome::Done, true) => "clean",
            (RunOutcome::Done, false) => "partial",
        }
    }
}

/// Login credentials for the HR account.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listed(cv_id: &str) -> Candidate {
        let mut c = Candidate::new(cv_id, "https://www.hellojob.az/");
        c.name = "Aysel Məmmədova".into();
        c.position = "Mühasib".into();
        c.age = Some(29);
        c
    }

    #[test]
    fn test_candidate_new_derives_url() {
        let c = Candidate::new("208329", "https://www.hellojob.az/");
        assert_eq!(c.cv_url, "https://www.hellojob.az/hr/cv-pool/cv/208329");
        assert!(c.phone.is_empty());
        assert!(!c.has_phone());
    }

    #[test]
    fn test_merge_never_blanks_fields() {
        let mut first = listed("1");
        let mut later = Candidate::new("1", "https://www.hellojob.az");
        later.salary = "800 AZN".into();
        first.merge(later);

        assert_eq!(first.name, "Aysel Məmmədova");
        assert_eq!(first.position, "Mühasib");
        assert_eq!(first.age, Some(29));
        assert_eq!(first.salary, "800 AZN");
    }

    #[test]
    fn test_merge_overwrites_with_non_empty() {
        let mut first = listed("1");
        let mut later = listed("1");
        later.position = "Baş mühasib".into();
        later.age = None;
        later.has_cv_file = true;
        first.merge(later);

        assert_eq!(first.position, "Baş mühasib");
        assert_eq!(first.age, Some(29));
        assert!(first.has_cv_file);
    }

    #[test]
    fn test_merge_details() {
        let mut first = listed("1");
        first.details = Some(CandidateDetails {
            birth_date: "01.02.1995".into(),
            ..Default::default()
        });
        let mut later = listed("1");
        later.details = Some(CandidateDetails {
            languages: "Azərbaycan, Rus".into(),
            ..Default::default()
        });
        first.merge(later);

        let details = first.details.unwrap();
        assert_eq!(details.birth_date, "01.02.1995");
        assert_eq!(details.languages, "Azərbaycan, Rus");
    }

    #[test]
    fn test_bounded_range_batches() {
        let range = PageRange::bounded(1, 5);
        assert_eq!(range.batch(1, 2), Some(vec![1, 2]));
        assert_eq!(range.batch(5, 2), Some(vec![5]));
        assert_eq!(range.batch(6, 2), None);
    }

    #[test]
    fn test_max_pages_caps_range() {
        let range = PageRange::all_from(10).with_max_pages(Some(3));
        assert_eq!(range.last_page(), Some(12));
        assert_eq!(range.batch(10, 20), Some(vec![10, 11, 12]));
        assert_eq!(range.batch(13, 20), None);

        let range = PageRange::bounded(1, 100).with_max_pages(Some(2));
        assert_eq!(range.last_page(), Some(2));
    }

    #[test]
    fn test_open_ended_range_never_exhausts() {
        let range = PageRange::all_from(600);
        assert!(range.is_open_ended());
        assert_eq!(range.batch(600, 1), Some(vec![600]));
        assert_eq!(range.batch(100_000, 2), Some(vec![100_000, 100_001]));
    }

    #[test]
    fn test_range_display() {
        assert_eq!(PageRange::bounded(1, 3).to_string(), "1..=3");
        assert_eq!(
            PageRange::all_from(2).with_max_pages(Some(5)).to_string(),
            "2..=all (max 5 pages)"
        );
    }

    #[test]
    fn test_summary_status() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.status(), "clean");
        summary.enrichment_failures = 1;
        assert_eq!(summary.status(), "partial");
        summary.outcome = RunOutcome::Aborted("login failed".into());
        assert_eq!(summary.status(), "aborted");
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_summary_serialization() {
        let summary = RunSummary {
            pages_fetched: 3,
            records_emitted: 90,
            ..Default::default()
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"pages_fetched\":3"));
        assert!(json.contains("\"records_emitted\":90"));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            email: "hr@example.com".into(),
            password: "hunter2".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("hr@example.com"));
        assert!(!dbg.contains("hunter2"));
    }
}
