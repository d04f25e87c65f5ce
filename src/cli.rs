//! Command-line interface definitions for the CV pool scraper.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Credentials can be provided via flags or environment variables; range
//! validation happens here so the pipeline only ever sees a resolved
//! [`PageRange`].

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::ScraperConfig;
use crate::models::{Credentials, PageEnd, PageRange};

/// Command-line arguments for the scraper.
///
/// # Examples
///
/// ```sh
/// # Pages 1 through 3
/// cvpool_scrape 1 3
///
/// # Everything from page 600 until the listing runs dry
/// cvpool_scrape 600 all -o ./out/tail.csv
///
/// # Single page, with CV page details
/// HELLOJOB_LOGIN=hr@example.com HELLOJOB_PASSWORD=... cvpool_scrape 5 --detailed
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// First listing page to scrape (1-based)
    pub start: u32,

    /// Last page to scrape, or `all` to keep going until a page comes back empty
    pub end: Option<EndArg>,

    /// CSV output path [default: hellojob_{start}_to_{end}.csv]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Never dispatch more than this many pages
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long)]
    pub verbose: bool,

    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Also fetch each CV page for birth date, education and languages
    #[arg(long)]
    pub detailed: bool,

    /// Simultaneous listing page requests
    #[arg(long)]
    pub page_concurrency: Option<usize>,

    /// Simultaneous show-phone requests
    #[arg(long)]
    pub phone_concurrency: Option<usize>,

    /// HR account login
    #[arg(long, env = "HELLOJOB_LOGIN")]
    pub email: String,

    /// HR account password
    #[arg(long, env = "HELLOJOB_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Also write the run summary as JSON to this path
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

/// The `END` positional: a page number or `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndArg {
    Page(u32),
    All,
}

impl FromStr for EndArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(EndArg::All);
        }
        s.parse::<u32>()
            .map(EndArg::Page)
            .map_err(|_| format!("expected a page number or `all`, got {s:?}"))
    }
}

impl Cli {
    /// Validate the positional arguments into a [`PageRange`].
    ///
    /// A missing `END` means a single page.
    pub fn resolve_range(&self) -> Result<PageRange, String> {
        if self.start < 1 {
            return Err("start page must be at least 1".to_string());
        }
        let range = match self.end.unwrap_or(EndArg::Page(self.start)) {
            EndArg::Page(end) if end < self.start => {
                return Err(format!(
                    "end page {end} is before start page {}",
                    self.start
                ));
            }
            EndArg::Page(end) => PageRange::bounded(self.start, end),
            EndArg::All => PageRange::all_from(self.start),
        };
        if self.max_pages == Some(0) {
            return Err("--max-pages must be at least 1".to_string());
        }
        Ok(range.with_max_pages(self.max_pages))
    }

    /// The CSV path to write, defaulting to `hellojob_{start}_to_{end}.csv`.
    pub fn output_path(&self, range: &PageRange) -> PathBuf {
        if let Some(path) = &self.output {
            return path.clone();
        }
        let end = match range.end {
            PageEnd::Page(end) => end.to_string(),
            PageEnd::All => "all".to_string(),
        };
        PathBuf::from(format!("hellojob_{}_to_{}.csv", range.start, end))
    }

    /// Apply flag overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut ScraperConfig) {
        if let Some(n) = self.page_concurrency {
            config.page_concurrency = n;
        }
        if let Some(n) = self.phone_concurrency {
            config.phone_concurrency = n;
        }
        if self.detailed {
            config.detailed = true;
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}
