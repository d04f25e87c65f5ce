//! HTTP access to the job board's HR endpoints.
//!
//! [`Portal`] is the seam between the pipeline and the network. The
//! production implementation, [`HttpPortal`], speaks to the site with a
//! cookie-carrying `reqwest` client:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | [`Portal::login`] | `GET /account/login`, then `POST /account/login` |
//! | [`Portal::listing_page`] | `GET /hr/cv-pool` or `GET /hr/cv-pool?page=N` |
//! | [`Portal::show_phone`] | `GET /hr/cv-pool/cv/{id}/show-phone` (JSON) |
//! | [`Portal::cv_page`] | `GET /hr/cv-pool/cv/{id}` |
//!
//! The cookie jar belongs to the client. Logging in builds a fresh client
//! with an empty jar and swaps it in, so a re-login never mixes cookies from
//! an expired session with the new one.

use once_cell::sync::Lazy;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::RequestError;
use crate::models::Credentials;
use crate::session::Session;
use crate::utils::truncate_for_log;

const LOGIN_PATH: &str = "/account/login";
const XSRF_COOKIE: &str = "XSRF-TOKEN";

static META_CSRF: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="csrf-token"]"#).expect("static selector"));

/// Transport for the four HR endpoints a run needs.
pub trait Portal {
    /// Root URL of the site, used to derive candidate CV URLs.
    fn base_url(&self) -> &str;

    /// Perform the login handshake and return the XSRF token to send with
    /// subsequent requests.
    async fn login(&self, credentials: &Credentials) -> Result<String, RequestError>;

    /// Raw HTML of one listing page.
    async fn listing_page(&self, session: &Session, page: u32) -> Result<String, RequestError>;

    /// Phone number of one candidate.
    async fn show_phone(&self, session: &Session, cv_id: &str) -> Result<String, RequestError>;

    /// Raw HTML of one candidate's CV page.
    async fn cv_page(&self, session: &Session, cv_id: &str) -> Result<String, RequestError>;
}

/// [`Portal`] over HTTPS with `reqwest`.
#[derive(Debug)]
pub struct HttpPortal {
    base: Url,
    base_str: String,
    user_agent: String,
    timeout: Duration,
    client: RwLock<Client>,
}

impl HttpPortal {
    pub fn new(config: &ScraperConfig) -> Result<Self, RequestError> {
        let base = Url::parse(&config.base_url)?;
        let timeout = config.request_timeout();
        let client = build_client(&config.user_agent, timeout, Arc::new(Jar::default()))?;
        Ok(Self {
            base_str: config.base_url.trim_end_matches('/').to_string(),
            base,
            user_agent: config.user_agent.clone(),
            timeout,
            client: RwLock::new(client),
        })
    }

    fn client(&self) -> Client {
        match self.client.read() {
            Ok(client) => client.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_client(&self, client: Client) {
        match self.client.write() {
            Ok(mut slot) => *slot = client,
            Err(poisoned) => *poisoned.into_inner() = client,
        }
    }

    fn url(&self, path: &str) -> Result<Url, RequestError> {
        Ok(self.base.join(path)?)
    }

    /// URL of listing page `page`; the first page has no query string.
    pub fn listing_url(&self, page: u32) -> Result<Url, RequestError> {
        if page <= 1 {
            self.url("/hr/cv-pool")
        } else {
            self.url(&format!("/hr/cv-pool?page={page}"))
        }
    }

    fn origin(&self) -> String {
        self.base.origin().ascii_serialization()
    }
}

fn build_client(user_agent: &str, timeout: Duration, jar: Arc<Jar>) -> Result<Client, RequestError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-GB,en-US;q=0.9,en;q=0.8,az;q=0.7"),
    );

    Ok(Client::builder()
        .cookie_provider(jar)
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?)
}

impl Portal for HttpPortal {
    fn base_url(&self) -> &str {
        &self.base_str
    }

    #[instrument(level = "info", skip_all, fields(email = %credentials.email))]
    async fn login(&self, credentials: &Credentials) -> Result<String, RequestError> {
        let jar = Arc::new(Jar::default());
        let client = build_client(&self.user_agent, self.timeout, Arc::clone(&jar))?;
        let login_url = self.url(LOGIN_PATH)?;

        let resp = client.get(login_url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        let cookie_token = resp
            .cookies()
            .find(|c| c.name() == XSRF_COOKIE)
            .map(|c| decode_token(c.value()));
        let body = resp.text().await?;
        let token = match cookie_token.or_else(|| meta_csrf_token(&body)) {
            Some(token) => token,
            None => {
                return Err(RequestError::UnexpectedShape(
                    "login page carried no XSRF token".into(),
                ));
            }
        };
        debug!("Obtained XSRF token from login page");

        let resp = client
            .post(login_url.clone())
            .header("X-XSRF-TOKEN", token.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .header(header::ORIGIN, self.origin())
            .header(header::REFERER, login_url.as_str())
            .header(header::ACCEPT, "application/json, text/plain, */*")
            .form(&[
                ("email", credentials.email.as_str()),
                ("password", credentials.password.as_str()),
                ("remember", "on"),
            ])
            .send()
            .await?;

        let status = resp.status();
        let bounced = landed_on_login(resp.url());
        let body = resp.text().await.map_err(RequestError::from);
        check_login_reply(status, bounced, body)?;

        // The site rotates the token on login; prefer the fresh one.
        let token = jar_token(&jar, &self.base).unwrap_or(token);
        self.replace_client(client);
        Ok(token)
    }

    #[instrument(level = "debug", skip_all, fields(page = page))]
    async fn listing_page(&self, _session: &Session, page: u32) -> Result<String, RequestError> {
        let url = self.listing_url(page)?;
        let resp = self.client().get(url).send().await?;
        if landed_on_login(resp.url()) {
            return Err(RequestError::AuthExpired);
        }
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        Ok(resp.text().await?)
    }

    #[instrument(level = "debug", skip_all, fields(%cv_id))]
    async fn show_phone(&self, session: &Session, cv_id: &str) -> Result<String, RequestError> {
        let url = self.url(&format!("/hr/cv-pool/cv/{cv_id}/show-phone"))?;
        let referer = self.url(&format!("/hr/cv-pool/cv/{cv_id}"))?;
        let resp = self
            .client()
            .get(url)
            .header("X-XSRF-TOKEN", session.xsrf_token())
            .header("X-Requested-With", "XMLHttpRequest")
            .header(header::ACCEPT, "application/json, text/plain, */*")
            .header(header::REFERER, referer.as_str())
            .send()
            .await?;
        if landed_on_login(resp.url()) {
            return Err(RequestError::AuthExpired);
        }
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        let body = resp.text().await?;
        parse_phone_reply(&body)
    }

    #[instrument(level = "debug", skip_all, fields(%cv_id))]
    async fn cv_page(&self, _session: &Session, cv_id: &str) -> Result<String, RequestError> {
        let url = self.url(&format!("/hr/cv-pool/cv/{cv_id}"))?;
        let resp = self.client().get(url).send().await?;
        if landed_on_login(resp.url()) {
            return Err(RequestError::AuthExpired);
        }
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    error: Option<bool>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhoneReply {
    error: Option<bool>,
    phone: Option<String>,
    message: Option<String>,
}

/// Map a non-success status to the error the pipeline reacts to.
pub fn classify_status(status: StatusCode) -> RequestError {
    match status.as_u16() {
        401 | 419 => RequestError::AuthExpired,
        404 => RequestError::NotFound,
        429 => RequestError::RateLimited,
        code => RequestError::Status(code),
    }
}

/// A request that was redirected to the login form means the session is gone.
fn landed_on_login(url: &Url) -> bool {
    url.path().trim_end_matches('/') == LOGIN_PATH
}

/// The XSRF cookie value is URL-encoded; the header wants it decoded.
fn decode_token(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn meta_csrf_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&META_CSRF)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn jar_token(jar: &Jar, base: &Url) -> Option<String> {
    let header = jar.cookies(base)?;
    let header = header.to_str().ok()?;
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == XSRF_COOKIE)
        .map(|(_, value)| decode_token(value))
}

/// Decide whether the login POST was accepted.
///
/// # Arguments
///
/// * `status` - HTTP status of the reply
/// * `bounced` - whether the final URL after redirects is the login page again
/// * `body` - the reply body, or the error raised while reading it
///
/// # Returns
///
/// `Ok(())` when the account is logged in. A body that could not be read is
/// passed through as-is, so a cut-off reply is never mistaken for success.
fn check_login_reply(
    status: StatusCode,
    bounced: bool,
    body: Result<String, RequestError>,
) -> Result<(), RequestError> {
    let body = body?;
    match status.as_u16() {
        401 | 403 | 422 => {
            let reason = login_message(&body).unwrap_or_else(|| status.to_string());
            return Err(RequestError::Rejected(reason));
        }
        _ if !status.is_success() => return Err(classify_status(status)),
        _ => {}
    }

    match serde_json::from_str::<LoginReply>(&body) {
        Ok(reply) if reply.error == Some(true) => Err(RequestError::Rejected(
            reply.message.unwrap_or_else(|| "login refused".to_string()),
        )),
        Ok(reply) => {
            info!(message = reply.message.as_deref().unwrap_or("ok"), "Login accepted");
            Ok(())
        }
        Err(_) if bounced => Err(RequestError::Rejected(
            "login form was served again".to_string(),
        )),
        Err(_) => {
            debug!(preview = %truncate_for_log(&body, 200), "Login reply was not JSON");
            Ok(())
        }
    }
}

fn login_message(body: &str) -> Option<String> {
    serde_json::from_str::<LoginReply>(body)
        .ok()
        .and_then(|reply| reply.message)
}

/// Interpret the show-phone JSON body.
pub fn parse_phone_reply(body: &str) -> Result<String, RequestError> {
    let reply: PhoneReply = serde_json::from_str(body).map_err(|e| {
        warn!(error = %e, preview = %truncate_for_log(body, 120), "show-phone reply was not JSON");
        RequestError::UnexpectedShape(e.to_string())
    })?;

    if reply.error.unwrap_or(true) {
        let limited = reply
            .message
            .as_deref()
            .map(|m| {
                let m = m.to_lowercase();
                m.contains("limit") || m.contains("too many")
            })
            .unwrap_or(false);
        return Err(if limited {
            RequestError::RateLimited
        } else {
            RequestError::NotFound
        });
    }

    match reply.phone.map(|p| p.trim().to_string()) {
        Some(phone) if !phone.is_empty() => Ok(phone),
        _ => Err(RequestError::NotFound),
    }
}
