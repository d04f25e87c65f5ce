//! In-memory portal and fixtures for exercising the pipeline without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ScraperConfig;
use crate::error::RequestError;
use crate::models::Credentials;
use crate::portal::Portal;
use crate::session::Session;

pub const BASE_URL: &str = "https://www.hellojob.az";

pub fn test_config() -> ScraperConfig {
    ScraperConfig {
        base_url: BASE_URL.to_string(),
        page_concurrency: 4,
        phone_concurrency: 2,
        phone_batch_size: 5,
        phone_batch_delay_ms: 1,
        rate_limit_pause_ms: 40,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        ..ScraperConfig::default()
    }
}

pub fn test_credentials() -> Credentials {
    Credentials {
        email: "hr@example.com".to_string(),
        password: "secret".to_string(),
    }
}

/// One listing item in the markup the site serves.
pub fn listing_item(cv_id: &str, name: &str, age: u32) -> String {
    format!(
        r##"<div class="vacancies__item vacancies__item--custom" data-id="{cv_id}">
  <div class="vacancies__body">
    <a class="vacancies__title" href="/hr/cv-pool/cv/{cv_id}">Satış təmsilçisi</a>
    <div class="vacancies__company">{name} ({age})</div>
    <ul class="vacancies__info">
      <li><svg class="svg-pin"><use href="#svg-pin"></use></svg> Bakı</li>
      <li>700 AZN</li>
      <li>Yerləşdirildi: 12 Avqust 2025</li>
    </ul>
    <span class="vacancies__progress">85% tamamlandı</span>
  </div>
</div>"##
    )
}

/// A listing page holding one item per id, in order.
pub fn listing_page_html(ids: &[String]) -> String {
    let items: String = ids
        .iter()
        .enumerate()
        .map(|(i, id)| listing_item(id, &format!("Namizəd {id}"), 20 + (i as u32 % 30)))
        .collect();
    format!(
        r#"<html><body><div class="vacancies">{items}</div><nav class="pagination"></nav></body></html>"#
    )
}

pub fn ids_for_page(page: u32, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}", page * 1000 + i as u32)).collect()
}

#[derive(Default)]
struct FakeState {
    login_failures: VecDeque<RequestError>,
    reject_relogin: Option<String>,
    login_attempts: usize,
    logins: usize,
    page_failures: HashMap<u32, VecDeque<RequestError>>,
    expire_on_page: Option<(u32, String)>,
    phone_failures: HashMap<String, VecDeque<RequestError>>,
    requested_pages: Vec<u32>,
    phone_requests: Vec<(String, Instant)>,
    in_flight_pages: usize,
    max_in_flight_pages: usize,
    in_flight_phones: usize,
    max_in_flight_phones: usize,
}

/// Scripted [`Portal`]: pages and phones are canned, failures are queued
/// per key and consumed one per call.
pub struct FakePortal {
    pages: HashMap<u32, String>,
    phones: HashMap<String, String>,
    cv_pages: HashMap<String, String>,
    latency: Duration,
    stop_on_page: Option<(u32, Arc<AtomicBool>)>,
    stop_on_phone: Option<(String, Arc<AtomicBool>)>,
    state: Mutex<FakeState>,
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            phones: HashMap::new(),
            cv_pages: HashMap::new(),
            latency: Duration::from_millis(2),
            stop_on_page: None,
            stop_on_phone: None,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Serve `count` generated candidates on `page`, each with a phone.
    pub fn with_listing(mut self, page: u32, count: usize) -> Self {
        let ids = ids_for_page(page, count);
        for id in &ids {
            self.phones.insert(id.clone(), format!("+994 50 {id}"));
        }
        self.pages.insert(page, listing_page_html(&ids));
        self
    }

    pub fn with_page_html(mut self, page: u32, html: impl Into<String>) -> Self {
        self.pages.insert(page, html.into());
        self
    }

    pub fn with_phone(mut self, cv_id: &str, phone: &str) -> Self {
        self.phones.insert(cv_id.to_string(), phone.to_string());
        self
    }

    pub fn with_cv_page(mut self, cv_id: &str, html: impl Into<String>) -> Self {
        self.cv_pages.insert(cv_id.to_string(), html.into());
        self
    }

    pub fn without_phone(mut self, cv_id: &str) -> Self {
        self.phones.remove(cv_id);
        self
    }

    pub fn fail_login(self, err: RequestError) -> Self {
        self.lock().login_failures.push_back(err);
        self
    }

    pub fn fail_page(self, page: u32, err: RequestError) -> Self {
        self.lock().page_failures.entry(page).or_default().push_back(err);
        self
    }

    pub fn fail_phone(self, cv_id: &str, err: RequestError) -> Self {
        self.lock()
            .phone_failures
            .entry(cv_id.to_string())
            .or_default()
            .push_back(err);
        self
    }

    /// Let the first login through, then refuse every later one.
    pub fn reject_relogin(self, message: &str) -> Self {
        self.lock().reject_relogin = Some(message.to_string());
        self
    }

    /// Raise `flag` while `page` is being served, as an operator interrupt would.
    pub fn stop_during_page(mut self, page: u32, flag: &Arc<AtomicBool>) -> Self {
        self.stop_on_page = Some((page, Arc::clone(flag)));
        self
    }

    /// Raise `flag` while the phone of `cv_id` is being looked up.
    pub fn stop_during_phone(mut self, cv_id: &str, flag: &Arc<AtomicBool>) -> Self {
        self.stop_on_phone = Some((cv_id.to_string(), Arc::clone(flag)));
        self
    }

    /// Reject the first session's token when `page` is requested with it.
    pub fn expire_on_page(self, page: u32) -> Self {
        self.lock().expire_on_page = Some((page, "token-1".to_string()));
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn login_attempts(&self) -> usize {
        self.lock().login_attempts
    }

    pub fn logins(&self) -> usize {
        self.lock().logins
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        self.lock().requested_pages.clone()
    }

    pub fn phone_requests(&self) -> Vec<(String, Instant)> {
        self.lock().phone_requests.clone()
    }

    pub fn max_in_flight_pages(&self) -> usize {
        self.lock().max_in_flight_pages
    }

    pub fn max_in_flight_phones(&self) -> usize {
        self.lock().max_in_flight_phones
    }
}

impl Portal for FakePortal {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn login(&self, _credentials: &Credentials) -> Result<String, RequestError> {
        let outcome = {
            let mut state = self.lock();
            state.login_attempts += 1;
            let relogin = state.logins > 0;
            match state.login_failures.pop_front() {
                Some(err) => Err(err),
                None if relogin && state.reject_relogin.is_some() => {
                    Err(RequestError::Rejected(state.reject_relogin.clone().unwrap_or_default()))
                }
                None => {
                    state.logins += 1;
                    Ok(format!("token-{}", state.logins))
                }
            }
        };
        tokio::time::sleep(self.latency).await;
        outcome
    }

    async fn listing_page(&self, session: &Session, page: u32) -> Result<String, RequestError> {
        let scripted = {
            let mut state = self.lock();
            state.requested_pages.push(page);
            state.in_flight_pages += 1;
            state.max_in_flight_pages = state.max_in_flight_pages.max(state.in_flight_pages);
            let expired = matches!(&state.expire_on_page, Some((p, token)) if *p == page && token == session.xsrf_token());
            if expired {
                Some(RequestError::AuthExpired)
            } else {
                state.page_failures.get_mut(&page).and_then(|q| q.pop_front())
            }
        };
        if let Some((p, flag)) = &self.stop_on_page {
            if *p == page {
                flag.store(true, Ordering::Relaxed);
            }
        }
        tokio::time::sleep(self.latency).await;
        self.lock().in_flight_pages -= 1;

        match scripted {
            Some(err) => Err(err),
            None => Ok(self
                .pages
                .get(&page)
                .cloned()
                .unwrap_or_else(|| listing_page_html(&[]))),
        }
    }

    async fn show_phone(&self, _session: &Session, cv_id: &str) -> Result<String, RequestError> {
        let scripted = {
            let mut state = self.lock();
            state.phone_requests.push((cv_id.to_string(), Instant::now()));
            state.in_flight_phones += 1;
            state.max_in_flight_phones = state.max_in_flight_phones.max(state.in_flight_phones);
            state.phone_failures.get_mut(cv_id).and_then(|q| q.pop_front())
        };
        if let Some((id, flag)) = &self.stop_on_phone {
            if id == cv_id {
                flag.store(true, Ordering::Relaxed);
            }
        }
        tokio::time::sleep(self.latency).await;
        self.lock().in_flight_phones -= 1;

        match scripted {
            Some(err) => Err(err),
            None => self.phones.get(cv_id).cloned().ok_or(RequestError::NotFound),
        }
    }

    async fn cv_page(&self, _session: &Session, cv_id: &str) -> Result<String, RequestError> {
        tokio::time::sleep(self.latency).await;
        self.cv_pages.get(cv_id).cloned().ok_or(RequestError::NotFound)
    }
}
