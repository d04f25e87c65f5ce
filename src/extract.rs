//! Listing and CV page parsing.
//!
//! Both entry points are pure functions over raw HTML. Parsing is
//! best-effort: a field that cannot be located stays empty, and only an item
//! without a usable `data-id` is dropped (and reported as a
//! [`ParseFailure`]).
//!
//! # Listing markup
//!
//! ```text
//! div.vacancies__item[data-id="208329"]
//! ├── .vacancies__title        position
//! ├── .vacancies__company      "Name Surname (34)"
//! ├── li > svg.svg-pin + text  location
//! ├── "700 AZN"                salary
//! ├── "85% tamamlandı"         profile completion
//! ├── "Yerləşdirildi: 12 Avqust 2025"
//! └── svg-download2 icon       has an attached CV file
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use crate::error::ParseFailure;
use crate::models::{Candidate, CandidateDetails};

static ITEM: Lazy<Selector> = Lazy::new(|| Selector::parse(".vacancies__item").expect("static selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(".vacancies__title").expect("static selector"));
static COMPANY: Lazy<Selector> = Lazy::new(|| Selector::parse(".vacancies__company").expect("static selector"));
static LIST_ENTRY: Lazy<Selector> = Lazy::new(|| Selector::parse("li").expect("static selector"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("static selector"));

static NAME_AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s*\(([^)]*)\)\s*$").expect("static regex"));
static COMPLETION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3})%\s*tamamlandı").expect("static regex"));
static SALARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:[ \u{a0}]\d{3})*)\s*AZN").expect("static regex"));
static POSTED_LABELLED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Yerləşdirildi:\s*(\d{1,2}\s+\w+\s+\d{4})").expect("static regex"));
static POSTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2}\s+\w+\s+\d{4})").expect("static regex"));

/// Result of parsing one listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub page: u32,
    /// Candidates in listing order, unique by `cv_id`.
    pub candidates: Vec<Candidate>,
    pub failures: Vec<ParseFailure>,
}

impl Extraction {
    /// A page with no recognizable records ends an open-ended run.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Parse one listing page into candidates.
#[instrument(level = "debug", skip(html, base_url), fields(bytes = html.len()))]
pub fn extract(html: &str, page: u32, base_url: &str) -> Extraction {
    let document = Html::parse_document(html);
    let mut extraction = Extraction {
        page,
        ..Default::default()
    };
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, item) in document.select(&ITEM).enumerate() {
        let candidate = match parse_item(item, page, index, base_url) {
            Ok(candidate) => candidate,
            Err(failure) => {
                warn!(%failure, "Dropping listing item");
                extraction.failures.push(failure);
                continue;
            }
        };

        match seen.get(&candidate.cv_id) {
            Some(&pos) => {
                debug!(cv_id = %candidate.cv_id, "Merging duplicate listing item");
                extraction.candidates[pos].merge(candidate);
            }
            None => {
                seen.insert(candidate.cv_id.clone(), extraction.candidates.len());
                extraction.candidates.push(candidate);
            }
        }
    }

    debug!(
        candidates = extraction.candidates.len(),
        failures = extraction.failures.len(),
        "Extracted listing page"
    );
    extraction
}

fn parse_item(
    item: ElementRef<'_>,
    page: u32,
    index: usize,
    base_url: &str,
) -> Result<Candidate, ParseFailure> {
    let raw_id = item.value().attr("data-id").map(str::trim).unwrap_or("");
    if raw_id.is_empty() {
        return Err(ParseFailure::MissingId { page, index });
    }
    if !raw_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseFailure::MalformedId {
            page,
            index,
            raw: raw_id.to_string(),
        });
    }

    let mut candidate = Candidate::new(raw_id, base_url);
    let text = element_text(item);
    let markup = item.html();

    candidate.position = first_text(item, &TITLE);
    let (name, age) = split_name_age(&first_text(item, &COMPANY));
    candidate.name = name;
    candidate.age = age;

    candidate.completion_percentage = COMPLETION
        .captures(&text)
        .map(|c| format!("{}%", &c[1]))
        .unwrap_or_default();
    candidate.salary = salary(item);
    candidate.location = location(item);
    candidate.posted_date = POSTED_LABELLED
        .captures(&text)
        .or_else(|| POSTED.captures(&text))
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    candidate.has_cv_file = markup.contains("svg-download2");

    Ok(candidate)
}

/// Collapse an element's text nodes into single-spaced text.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `N AZN` amount found inside a single text node. Matching node by
/// node keeps a neighbouring number (a posted year) out of the amount.
fn salary(item: ElementRef<'_>) -> String {
    item.text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find_map(|t| {
            SALARY.captures(&t).map(|c| {
                let digits: String = c[1].chars().filter(char::is_ascii_digit).collect();
                format!("{digits} AZN")
            })
        })
        .unwrap_or_default()
}

fn first_text(item: ElementRef<'_>, selector: &Selector) -> String {
    item.select(selector)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

/// `"Name Surname (34)"` → name and age. A non-numeric parenthesised part
/// leaves the age unset; without parentheses the whole text is the name.
fn split_name_age(text: &str) -> (String, Option<u32>) {
    match NAME_AGE.captures(text) {
        Some(caps) => {
            let name = caps[1].trim().to_string();
            let age = caps[2].trim().parse::<u32>().ok();
            (name, age)
        }
        None => (text.trim().to_string(), None),
    }
}

fn location(item: ElementRef<'_>) -> String {
    item.select(&LIST_ENTRY)
        .find(|li| li.html().contains("svg-pin"))
        .map(element_text)
        .unwrap_or_default()
}

/// Labels introducing a field on the CV page, and headings that end one.
const BIRTH_LABELS: &[&str] = &["doğum tarixi", "date of birth", "birth date"];
const EDUCATION_LABELS: &[&str] = &["təhsil", "education"];
const LANGUAGE_LABELS: &[&str] = &["dil bilikləri", "dillər", "languages"];
const OTHER_HEADINGS: &[&str] = &[
    "ünvan",
    "telefon",
    "iş təcrübəsi",
    "bacarıqlar",
    "haqqında",
    "experience",
    "skills",
    "about",
    "address",
];

/// Parse the labelled fields of a CV page. Missing labels yield empty fields.
pub fn extract_details(html: &str) -> CandidateDetails {
    let document = Html::parse_document(html);
    let nodes: Vec<String> = match document.select(&BODY).next() {
        Some(body) => body
            .text()
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .collect(),
        None => Vec::new(),
    };

    CandidateDetails {
        birth_date: labelled_value(&nodes, BIRTH_LABELS, 1),
        education: labelled_value(&nodes, EDUCATION_LABELS, 3),
        languages: labelled_value(&nodes, LANGUAGE_LABELS, 6),
    }
}

fn normalize_label(text: &str) -> String {
    text.trim().trim_end_matches(':').trim().to_lowercase()
}

fn is_label(text: &str) -> bool {
    let key = match text.split_once(':') {
        Some((head, _)) => normalize_label(head),
        None => normalize_label(text),
    };
    BIRTH_LABELS
        .iter()
        .chain(EDUCATION_LABELS)
        .chain(LANGUAGE_LABELS)
        .chain(OTHER_HEADINGS)
        .any(|label| key == *label)
}

/// Value following the first node carrying one of `labels`: either the text
/// after `Label:` on the same node or up to `max_nodes` following nodes.
fn labelled_value(nodes: &[String], labels: &[&str], max_nodes: usize) -> String {
    for (i, node) in nodes.iter().enumerate() {
        if let Some((head, rest)) = node.split_once(':') {
            if labels.contains(&normalize_label(head).as_str()) && !rest.trim().is_empty() {
                return rest.trim().to_string();
            }
        }
        if !labels.contains(&normalize_label(node).as_str()) {
            continue;
        }
        return nodes[i + 1..]
            .iter()
            .take_while(|n| !is_label(n))
            .take(max_nodes)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.hellojob.az";

    const PAGE: &str = r##"
<html><body>
<div class="vacancies">
  <div class="vacancies__item vacancies__item--custom" data-id="208329">
    <div class="vacancies__body">
      <a class="vacancies__title" href="/hr/cv-pool/cv/208329">Mühasib</a>
      <div class="vacancies__company">Aysel Məmmədova (29)</div>
      <ul class="vacancies__info">
        <li><svg class="svg-pin"><use href="#svg-pin"></use></svg> Bakı</li>
        <li>1 200 AZN</li>
        <li>Yerləşdirildi: 3 Sentyabr 2025</li>
      </ul>
      <span>92% tamamlandı</span>
      <a class="download"><svg><use href="#svg-download2"></use></svg></a>
    </div>
  </div>
  <div class="vacancies__item vacancies__item--custom" data-id="208330">
    <div class="vacancies__body">
      <a class="vacancies__title" href="/hr/cv-pool/cv/208330">Sürücü</a>
      <div class="vacancies__company">Elvin Quliyev</div>
    </div>
  </div>
  <div class="vacancies__item vacancies__item--custom">
    <a class="vacancies__title">Orphan without id</a>
  </div>
  <div class="vacancies__item vacancies__item--custom" data-id="abc">
    <a class="vacancies__title">Bad id</a>
  </div>
  <div class="vacancies__item vacancies__item--custom" data-id="208330">
    <div class="vacancies__body">
      <div class="vacancies__company">Elvin Quliyev (N/A)</div>
      <ul><li><svg class="svg-pin"></svg> Sumqayıt</li></ul>
      <span>15 Avqust 2025</span>
    </div>
  </div>
</div>
</body></html>"##;

    #[test]
    fn test_extracts_full_item() {
        let extraction = extract(PAGE, 4, BASE);
        let first = &extraction.candidates[0];
        assert_eq!(first.cv_id, "208329");
        assert_eq!(first.cv_url, "https://www.hellojob.az/hr/cv-pool/cv/208329");
        assert_eq!(first.position, "Mühasib");
        assert_eq!(first.name, "Aysel Məmmədova");
        assert_eq!(first.age, Some(29));
        assert_eq!(first.location, "Bakı");
        assert_eq!(first.salary, "1200 AZN");
        assert_eq!(first.completion_percentage, "92%");
        assert_eq!(first.posted_date, "3 Sentyabr 2025");
        assert!(first.has_cv_file);
        assert!(first.phone.is_empty());
    }

    #[test]
    fn test_salary_is_not_joined_with_posted_year() {
        let html = r#"<div class="vacancies__item" data-id="9">
  <ul>
    <li>Yerləşdirildi: 12 Avqust 2025</li>
    <li>700 AZN</li>
  </ul>
</div>"#;
        let extraction = extract(html, 1, BASE);
        let c = &extraction.candidates[0];
        assert_eq!(c.salary, "700 AZN");
        assert_eq!(c.posted_date, "12 Avqust 2025");
    }

    #[test]
    fn test_sparse_item_leaves_fields_empty() {
        let extraction = extract(PAGE, 4, BASE);
        let second = &extraction.candidates[1];
        assert_eq!(second.cv_id, "208330");
        assert_eq!(second.position, "Sürücü");
        assert!(!second.has_cv_file);
        assert!(second.completion_percentage.is_empty());
    }

    #[test]
    fn test_duplicates_merge_without_blanking() {
        let extraction = extract(PAGE, 4, BASE);
        assert_eq!(extraction.candidates.len(), 2);
        let merged = &extraction.candidates[1];
        // second occurrence adds location and date but has no title
        assert_eq!(merged.position, "Sürücü");
        assert_eq!(merged.name, "Elvin Quliyev");
        assert_eq!(merged.age, None);
        assert_eq!(merged.location, "Sumqayıt");
        assert_eq!(merged.posted_date, "15 Avqust 2025");
    }

    #[test]
    fn test_items_without_usable_id_are_failures() {
        let extraction = extract(PAGE, 4, BASE);
        assert_eq!(
            extraction.failures,
            vec![
                ParseFailure::MissingId { page: 4, index: 2 },
                ParseFailure::MalformedId {
                    page: 4,
                    index: 3,
                    raw: "abc".into()
                },
            ]
        );
    }

    #[test]
    fn test_ids_are_unique_and_non_empty() {
        let extraction = extract(PAGE, 4, BASE);
        let mut ids: Vec<_> = extraction.candidates.iter().map(|c| c.cv_id.clone()).collect();
        assert!(ids.iter().all(|id| !id.is_empty()));
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), extraction.candidates.len());
    }

    #[test]
    fn test_extraction_is_idempotent() {
        assert_eq!(extract(PAGE, 4, BASE), extract(PAGE, 4, BASE));
    }

    #[test]
    fn test_empty_page() {
        let extraction = extract("<html><body><p>Heç nə tapılmadı</p></body></html>", 601, BASE);
        assert!(extraction.is_empty());
        assert!(extraction.failures.is_empty());
        assert!(extract("", 1, BASE).is_empty());
    }

    #[test]
    fn test_preserves_listing_order() {
        let ids: Vec<String> = (0..30).map(|i| format!("{}", 5000 + i)).collect();
        let html = crate::testing::listing_page_html(&ids);
        let extraction = extract(&html, 1, BASE);
        let got: Vec<_> = extraction.candidates.iter().map(|c| c.cv_id.clone()).collect();
        assert_eq!(got, ids);
        assert_eq!(extraction.candidates[0].location, "Bakı");
        assert_eq!(extraction.candidates[0].salary, "700 AZN");
        assert_eq!(extraction.candidates[0].posted_date, "12 Avqust 2025");
    }

    #[test]
    fn test_split_name_age() {
        assert_eq!(split_name_age("Nigar Əliyeva (41)"), ("Nigar Əliyeva".into(), Some(41)));
        assert_eq!(split_name_age("Nigar Əliyeva"), ("Nigar Əliyeva".into(), None));
        assert_eq!(split_name_age("Nigar (yaş?)"), ("Nigar".into(), None));
        assert_eq!(split_name_age(""), (String::new(), None));
    }

    #[test]
    fn test_extract_details() {
        let html = r#"
<html><body>
  <h1 class="section-title">Aysel Məmmədova</h1>
  <ul class="cv__info">
    <li><span>Doğum tarixi:</span> <span>14.03.1996</span></li>
    <li><span>Ünvan</span> <span>Bakı</span></li>
  </ul>
  <h3>Təhsil</h3>
  <p>Azərbaycan Dövlət İqtisad Universiteti</p>
  <h3>Dil bilikləri</h3>
  <ul><li>Azərbaycan</li><li>Rus</li><li>İngilis</li></ul>
  <h3>Bacarıqlar</h3>
  <p>Excel</p>
</body></html>"#;
        let details = extract_details(html);
        assert_eq!(details.birth_date, "14.03.1996");
        assert_eq!(details.education, "Azərbaycan Dövlət İqtisad Universiteti");
        assert_eq!(details.languages, "Azərbaycan, Rus, İngilis");
    }

    #[test]
    fn test_extract_details_inline_values() {
        let html = "<html><body><p>Date of birth: 1990-05-01</p><p>Languages: English, German</p></body></html>";
        let details = extract_details(html);
        assert_eq!(details.birth_date, "1990-05-01");
        assert_eq!(details.languages, "English, German");
        assert!(details.education.is_empty());
    }

    #[test]
    fn test_extract_details_missing() {
        assert!(extract_details("<html><body><p>nothing</p></body></html>").is_empty());
    }
}
