//! The PBase session: a cookie-carrying `ureq` agent, the login handshake and
//! the [`Site`] implementation the mirror runs against.
//!
//! Every request goes through one [`Throttle`], so the configured delay holds
//! across all worker threads.

use crate::cancel::CancelFlag;
use crate::config::{ConfigError, MirrorConfig};
use crate::gallery::{GalleryRef, SiteScope, site_root};
use crate::html;
use crate::site::{DownloadError, FetchError, GalleryPage, ItemPage, Site};
use std::io::{Read, Write};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// Download buffer size.
pub const CHUNK_SIZE: usize = 32 * 1024;

type Response = ureq::http::Response<ureq::Body>;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no login form found at {0}")]
    NoLoginForm(String),
    #[error("login form has no username field")]
    MissingFields,
    #[error("login rejected by {0}; check username and password")]
    Rejected(String),
}

/// Connection settings taken from the resolved config.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: Url,
    pub user_agent: String,
    pub delay: Duration,
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &MirrorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.base_url()?,
            user_agent: config.user_agent.clone(),
            delay: config.delay(),
            timeout: config.timeout(),
        })
    }
}

/// Global minimum spacing between requests.
///
/// The lock is held while sleeping, so concurrent callers queue up and the
/// spacing holds across threads.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
        }
    }

    /// Block until at least `delay` has passed since the previous call.
    pub fn wait(&self) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

pub struct PbaseClient {
    agent: ureq::Agent,
    root: Url,
    scope: SiteScope,
    throttle: Throttle,
}

impl PbaseClient {
    pub fn new(settings: &ClientSettings) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(settings.timeout.max(Duration::from_secs(1))))
            .user_agent(settings.user_agent.as_str())
            .build();
        Self {
            agent: config.into(),
            root: site_root(&settings.base_url),
            scope: SiteScope::new(&settings.base_url),
            throttle: Throttle::new(settings.delay),
        }
    }

    /// Site root every relative path resolves against.
    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Log in through the site's login form. The session cookies stay in the
    /// agent for every later request.
    pub fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let login_url = self.page("login")?;
        let page = self.get_html(&login_url, None)?;
        let form =
            html::login_form(&page).ok_or_else(|| AuthError::NoLoginForm(login_url.to_string()))?;
        if form.username_field.is_none() {
            return Err(AuthError::MissingFields);
        }

        let action = match form.action.as_deref().map(str::trim) {
            Some(action) if !action.is_empty() => login_url.join(action).map_err(|e| {
                FetchError::Parse {
                    url: login_url.to_string(),
                    message: format!("bad form action {action:?}: {e}"),
                }
            })?,
            _ => login_url.clone(),
        };
        debug!(action = %action, fields = form.fields.len(), "submitting login form");

        self.throttle.wait();
        let mut response = self
            .agent
            .post(action.as_str())
            .header("Referer", login_url.as_str())
            .send_form(form.payload(username, password))
            .map_err(|e| transport(&action, e))?;
        let body = checked_text(&action, &mut response)?;
        if html::looks_authenticated(&body) {
            info!(username, "logged in");
            return Ok(());
        }

        let account = self.page("myaccount")?;
        let body = self.get_html(&account, None)?;
        if html::looks_authenticated(&body) {
            info!(username, "logged in");
            Ok(())
        } else {
            Err(AuthError::Rejected(action.to_string()))
        }
    }

    fn page(&self, path: &str) -> Result<Url, FetchError> {
        self.root.join(path).map_err(|e| FetchError::Parse {
            url: format!("{}{path}", self.root),
            message: e.to_string(),
        })
    }

    fn get(&self, url: &Url, referer: Option<&Url>) -> Result<Response, FetchError> {
        self.throttle.wait();
        debug!(url = %url, "GET");
        let mut request = self.agent.get(url.as_str());
        if let Some(referer) = referer {
            request = request.header("Referer", referer.as_str());
        }
        let response = request.call().map_err(|e| transport(url, e))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    fn get_html(&self, url: &Url, referer: Option<&Url>) -> Result<String, FetchError> {
        let mut response = self.get(url, referer)?;
        read_text(url, &mut response)
    }
}

impl Site for PbaseClient {
    fn gallery(&self, gallery: &GalleryRef) -> Result<GalleryPage, FetchError> {
        let body = self.get_html(gallery.url(), None)?;
        Ok(html::parse_gallery(&body, gallery, &self.scope))
    }

    fn item(&self, page: &Url) -> Result<ItemPage, FetchError> {
        let body = self.get_html(page, None)?;
        Ok(html::parse_item(&body, page))
    }

    fn binary_url(&self, link: &Url, referer: &Url) -> Result<Option<Url>, FetchError> {
        let mut response = self.get(link, Some(referer))?;
        if header_string(&response, "content-type").starts_with("image/") {
            return Ok(Some(link.clone()));
        }
        let body = read_text(link, &mut response)?;
        Ok(html::display_image_in(&body, link))
    }

    fn download(
        &self,
        url: &Url,
        referer: &Url,
        sink: &mut dyn Write,
        cancel: &CancelFlag,
    ) -> Result<u64, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let mut response = self.get(url, Some(referer))?;
        let mut reader = response.body_mut().as_reader();
        let mut buf = vec![0_u8; CHUNK_SIZE];
        let mut written: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let read = reader.read(&mut buf).map_err(|e| FetchError::Body {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            if read == 0 {
                break;
            }
            sink.write_all(&buf[..read])?;
            written = written.saturating_add(read as u64);
        }
        debug!(url = %url, bytes = written, "downloaded");
        Ok(written)
    }
}

fn transport(url: &Url, error: ureq::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_string(),
        message: error.to_string(),
    }
}

fn read_text(url: &Url, response: &mut Response) -> Result<String, FetchError> {
    response
        .body_mut()
        .read_to_string()
        .map_err(|e| FetchError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })
}

/// Body of a response that bypassed [`PbaseClient::get`], after the same
/// status check.
fn checked_text(url: &Url, response: &mut Response) -> Result<String, FetchError> {
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }
    read_text(url, response)
}

fn header_string(response: &Response, key: &str) -> String {
    response
        .headers()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}
