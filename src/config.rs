//! Environment settings and the crawl plan.
//!
//! Settings come from the process environment (a `.env` file is loaded by
//! `main` through `dotenvy`). The crawl plan is a JSON file that lists the
//! Sources, their categories and optional selector overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::crawler::DEFAULT_MAX_PAGES;
use crate::error::CatalogError;
use crate::traits::SiteSelectors;
use crate::verify::DEFAULT_TOLERANCE_PCT;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct Settings {
    /// `CATALOG_ORIGIN`
    pub origin: Option<Url>,
    /// `CATALOG_EMAIL`
    pub identity: Option<String>,
    /// `CATALOG_PASSWORD`
    pub secret: Option<String>,
    /// `CATALOG_COOKIE`, a pre-authenticated cookie string that bypasses login
    pub cookie: Option<String>,
    /// `FORCE_REFRESH`
    pub force_refresh: bool,
    /// `ONLY_FILES`, comma separated
    pub only_files: Option<Vec<String>>,
    /// `HEADLESS`, only meaningful for browser-driven variants
    pub headless: bool,
    /// `CATALOG_DATA_DIR`
    pub data_dir: PathBuf,
    /// `CATALOG_SOURCES`
    pub sources_path: PathBuf,
    /// `VERIFY_LIMIT`
    pub verify_limit: Option<usize>,
    /// `VERIFY_TOLERANCE`, in percent
    pub verify_tolerance: f64,
    /// `REQUEST_DELAY_MS`
    pub request_delay: Duration,
    /// `HTTP_TIMEOUT_SECS`
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            origin: None,
            identity: None,
            secret: None,
            cookie: None,
            force_refresh: false,
            only_files: None,
            headless: true,
            data_dir: PathBuf::from("data"),
            sources_path: PathBuf::from("sources.json"),
            verify_limit: None,
            verify_tolerance: DEFAULT_TOLERANCE_PCT,
            request_delay: Duration::from_millis(400),
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    /// [`CatalogError::Config`] when a variable is present but malformed.
    pub fn from_env() -> Result<Self, CatalogError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    /// [`CatalogError::Config`] when a value is present but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CatalogError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut settings = Self::default();

        if let Some(origin) = get("CATALOG_ORIGIN") {
            settings.origin = Some(
                Url::parse(&origin)
                    .map_err(|e| CatalogError::Config(format!("CATALOG_ORIGIN {origin:?}: {e}")))?,
            );
        }
        settings.identity = get("CATALOG_EMAIL");
        settings.secret = get("CATALOG_PASSWORD");
        settings.cookie = get("CATALOG_COOKIE");
        settings.force_refresh = get("FORCE_REFRESH").is_some_and(|v| is_truthy(&v));
        settings.only_files = get("ONLY_FILES").map(|v| parse_list(&v));
        if let Some(headless) = get("HEADLESS") {
            settings.headless = is_truthy(&headless);
        }
        if let Some(dir) = get("CATALOG_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("CATALOG_SOURCES") {
            settings.sources_path = PathBuf::from(path);
        }
        if let Some(limit) = get("VERIFY_LIMIT") {
            settings.verify_limit = Some(parse_number("VERIFY_LIMIT", &limit)?);
        }
        if let Some(tolerance) = get("VERIFY_TOLERANCE") {
            settings.verify_tolerance =
                check_tolerance("VERIFY_TOLERANCE", parse_number("VERIFY_TOLERANCE", &tolerance)?)?;
        }
        if let Some(ms) = get("REQUEST_DELAY_MS") {
            settings.request_delay = Duration::from_millis(parse_number("REQUEST_DELAY_MS", &ms)?);
        }
        if let Some(secs) = get("HTTP_TIMEOUT_SECS") {
            settings.timeout = Duration::from_secs(parse_number("HTTP_TIMEOUT_SECS", &secs)?);
        }
        if let Some(agent) = get("CATALOG_USER_AGENT") {
            settings.user_agent = agent;
        }

        Ok(settings)
    }

    /// Origin for network commands.
    ///
    /// # Errors
    /// [`CatalogError::Config`] when `CATALOG_ORIGIN` was not set.
    pub fn require_origin(&self) -> Result<&Url, CatalogError> {
        self.origin
            .as_ref()
            .ok_or_else(|| CatalogError::Config("CATALOG_ORIGIN is not set".to_string()))
    }

    /// Whether a run may touch `file`.
    pub fn allows_file(&self, file: &str) -> bool {
        self.only_files
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|f| f == file))
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.identity.as_deref()?, self.secret.as_deref()?))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CatalogError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| CatalogError::Config(format!("{key} {value:?}: {e}")))
}

/// Accepts a verification tolerance: a finite, non-negative percentage.
pub fn check_tolerance(key: &str, pct: f64) -> Result<f64, CatalogError> {
    if pct.is_finite() && pct >= 0.0 {
        Ok(pct)
    } else {
        Err(CatalogError::Config(format!(
            "{key} {pct}: must be a finite percentage of at least 0"
        )))
    }
}

/// One Source from the crawl plan.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    /// Dataset file name inside the data directory
    pub file: String,
    #[serde(default)]
    pub max_pages: Option<usize>,
    /// Search URL with a `{query}` placeholder
    #[serde(default)]
    pub search_url_pattern: Option<String>,
    #[serde(default)]
    pub selectors: SiteSelectors,
    pub categories: Vec<CategorySpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySpec {
    pub category: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

impl SourceSpec {
    pub fn max_pages(&self) -> usize {
        self.max_pages.unwrap_or(DEFAULT_MAX_PAGES).max(1)
    }

    /// Crawl root for `category`: its URL, or the search pattern filled with its query.
    ///
    /// # Errors
    /// [`CatalogError::Config`] when neither yields a valid URL.
    pub fn category_root(&self, category: &CategorySpec, origin: Option<&Url>) -> Result<Url, CatalogError> {
        let raw = match (&category.url, &category.query, &self.search_url_pattern) {
            (Some(url), _, _) => url.clone(),
            (None, Some(query), Some(pattern)) => build_search_url(pattern, query),
            _ => {
                return Err(CatalogError::Config(format!(
                    "category {:?} in source {:?} needs a url or a query with search_url_pattern",
                    category.category, self.name
                )));
            }
        };

        let parsed = match origin {
            Some(origin) => origin.join(&raw),
            None => Url::parse(&raw),
        };
        parsed.map_err(|e| CatalogError::Config(format!("category url {raw:?}: {e}")))
    }
}

/// Fills a search pattern's `{query}` placeholder with the URL-encoded term.
pub fn build_search_url(pattern: &str, query: &str) -> String {
    let encoded = urlencoding::encode(query);
    pattern.replace("{query}", &encoded)
}

/// Reads the crawl plan.
///
/// # Errors
/// * [`CatalogError::Persistence`] when the file cannot be read
/// * [`CatalogError::Parse`] when it is not a valid plan
pub fn load_sources(path: &Path) -> Result<Vec<SourceSpec>, CatalogError> {
    let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::persistence(path, e))?;
    serde_json::from_str(&raw).map_err(|e| CatalogError::parse(path.display(), e))
}
