//! Cookie-carrying HTTP session against the catalog origin.

mod cookies;
mod login;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE, LOCATION, REFERER, SET_COOKIE};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CatalogError;
use crate::traits::PageSource;

pub use cookies::CookieJar;
pub use login::{ACCOUNT_PATH, LOGIN_PATHS, LoginForm, find_login_form, shows_logout};

const MAX_REDIRECTS: usize = 10;

/// Extra request options for [`Session::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Form-encoded POST body. `None` issues a GET.
    pub form: Option<Vec<(String, String)>>,
    pub referer: Option<Url>,
}

/// A fetched response after redirects were followed.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
}

/// HTTP client that behaves like a logged-in browser session.
///
/// Redirects are followed by hand so that `Set-Cookie` headers on every hop
/// land in the jar. Clones share the jar.
#[derive(Clone)]
pub struct Session {
    client: Client,
    origin: Url,
    jar: Arc<Mutex<CookieJar>>,
    login_paths: Vec<String>,
    account_path: String,
}

impl Session {
    /// Builds a session for `origin`.
    ///
    /// # Errors
    /// [`CatalogError::Config`] when the HTTP client cannot be built.
    pub fn new(origin: Url, user_agent: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CatalogError::Config(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            origin,
            jar: Arc::new(Mutex::new(CookieJar::default())),
            login_paths: LOGIN_PATHS.iter().map(ToString::to_string).collect(),
            account_path: ACCOUNT_PATH.to_string(),
        })
    }

    /// Replaces the candidate login paths and the account page used to check login.
    pub fn with_login_paths(mut self, paths: Vec<String>, account_path: impl Into<String>) -> Self {
        self.login_paths = paths;
        self.account_path = account_path.into();
        self
    }

    /// Seeds the jar from a pre-authenticated cookie string.
    pub fn with_cookie_string(self, raw: &str) -> Self {
        let seeded = CookieJar::from_cookie_string(raw);
        if let Ok(mut jar) = self.jar.lock() {
            *jar = seeded;
        }
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Snapshot of the current cookies.
    pub fn cookies(&self) -> CookieJar {
        self.jar.lock().map(|jar| jar.clone()).unwrap_or_default()
    }

    /// Tries every candidate login page until one leaves the session logged in.
    pub async fn login(&self, identity: &str, secret: &str) -> bool {
        for path in &self.login_paths {
            let Ok(page_url) = self.origin.join(path) else {
                continue;
            };
            let page = match self.fetch(&page_url, FetchOptions::default()).await {
                Ok(page) if page.status.is_success() => page,
                Ok(page) => {
                    debug!(url = %page_url, status = %page.status, "login candidate not available");
                    continue;
                }
                Err(err) => {
                    debug!(url = %page_url, "login candidate failed: {err}");
                    continue;
                }
            };

            let Some(form) = find_login_form(&page.body, &page.url) else {
                debug!(url = %page.url, "no login form on candidate page");
                continue;
            };

            info!(url = %form.action, "submitting login form");
            let options = FetchOptions {
                form: Some(form.fields(identity, secret)),
                referer: Some(page.url.clone()),
            };
            if let Err(err) = self.fetch(&form.action, options).await {
                warn!(url = %form.action, "login submit failed: {err}");
                continue;
            }

            if self.is_logged_in().await {
                info!(path = %path, cookies = self.cookies().len(), "login succeeded");
                return true;
            }
            debug!(path = %path, "login attempt did not produce a session");
        }

        warn!(origin = %self.origin, "login failed on every candidate path");
        false
    }

    /// Re-fetches the account page and looks for a logout link.
    pub async fn is_logged_in(&self) -> bool {
        let Ok(account) = self.origin.join(&self.account_path) else {
            return false;
        };
        match self.fetch(&account, FetchOptions::default()).await {
            Ok(page) => page.status.is_success() && shows_logout(&page.body),
            Err(_) => false,
        }
    }

    /// Sends one request with the jar's cookies and records every `Set-Cookie`.
    ///
    /// Non-success statuses are returned, not raised; use
    /// [`PageSource::fetch_html`] for the strict variant.
    ///
    /// # Errors
    /// [`CatalogError::Fetch`] on network errors or a redirect loop.
    pub async fn fetch(&self, url: &Url, options: FetchOptions) -> Result<Fetched, CatalogError> {
        let mut current = url.clone();
        let mut form = options.form;
        let mut referer = options.referer;

        for _ in 0..=MAX_REDIRECTS {
            let method = if form.is_some() { Method::POST } else { Method::GET };
            let mut request = self
                .client
                .request(method, current.clone())
                .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8");
            if let Some(cookie) = self.cookie_header() {
                request = request.header(COOKIE, cookie);
            }
            if let Some(referer) = &referer {
                request = request.header(REFERER, referer.as_str());
            }
            if let Some(fields) = &form {
                request = request.form(fields);
            }

            let response = request
                .send()
                .await
                .map_err(|e| CatalogError::fetch(&current, e))?;
            self.capture_cookies(response.headers());

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| current.join(loc).ok());

            match location {
                Some(next) if status.is_redirection() => {
                    debug!(from = %current, to = %next, status = %status, "following redirect");
                    if !matches!(
                        status,
                        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
                    ) {
                        form = None;
                    }
                    referer = Some(current);
                    current = next;
                }
                _ => {
                    let body = response
                        .text()
                        .await
                        .map_err(|e| CatalogError::fetch(&current, e))?;
                    return Ok(Fetched {
                        url: current,
                        status,
                        body,
                    });
                }
            }
        }

        Err(CatalogError::fetch(url, "too many redirects"))
    }

    fn cookie_header(&self) -> Option<String> {
        self.jar.lock().ok().and_then(|jar| jar.header_value())
    }

    fn capture_cookies(&self, headers: &reqwest::header::HeaderMap) {
        let Ok(mut jar) = self.jar.lock() else {
            return;
        };
        for value in headers.get_all(SET_COOKIE) {
            if let Ok(raw) = value.to_str() {
                jar.store_set_cookie(raw);
            }
        }
    }
}

#[async_trait]
impl PageSource for Session {
    async fn fetch_html(&self, url: &Url) -> Result<String, CatalogError> {
        let page = self.fetch(url, FetchOptions::default()).await?;
        if !page.status.is_success() {
            return Err(CatalogError::Status {
                url: page.url.to_string(),
                status: page.status.as_u16(),
            });
        }
        Ok(page.body)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("origin", &self.origin.as_str())
            .field("cookies", &self.cookies().len())
            .finish_non_exhaustive()
    }
}
