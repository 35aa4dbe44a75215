//! TTL-cached on-demand price lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use url::Url;

use crate::error::CatalogError;
use crate::extract;
use crate::traits::PageSource;

/// How long a fetched price is served without going back to the source.
pub const PRICE_TTL_HOURS: i64 = 12;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and replays. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheEntry {
    price: i64,
    fetched_at: DateTime<Utc>,
}

/// Process-local price cache keyed by detail-page URL.
///
/// Entries are refreshed on read once older than the TTL and are never evicted
/// otherwise. Failed lookups are not cached, so the next read retries.
pub struct PriceCache<C: Clock = SystemClock> {
    entries: HashMap<String, CacheEntry>,
    clock: C,
    ttl: Duration,
}

impl PriceCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for PriceCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> PriceCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
            ttl: Duration::hours(PRICE_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached price when fresh, otherwise a live fetch that refreshes the entry.
    pub async fn get(&mut self, source: &dyn PageSource, url: &str) -> Option<i64> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(url)
            && now - entry.fetched_at < self.ttl
        {
            debug!(url, "price cache hit");
            return Some(entry.price);
        }

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(url, "cannot look up price for invalid url: {err}");
                return None;
            }
        };
        match fetch_live_price(source, &parsed).await {
            Ok(Some(price)) => {
                self.entries.insert(
                    url.to_string(),
                    CacheEntry {
                        price,
                        fetched_at: self.clock.now(),
                    },
                );
                Some(price)
            }
            Ok(None) => {
                debug!(url, "no price found on page");
                None
            }
            Err(err) => {
                warn!(url, "price lookup failed: {err}");
                None
            }
        }
    }
}

/// Always-live price read: structured data first, then the regex fallback.
///
/// # Errors
/// Whatever the page source returns for the fetch.
pub async fn fetch_live_price(
    source: &dyn PageSource,
    url: &Url,
) -> Result<Option<i64>, CatalogError> {
    let html = source.fetch_html(url).await?;
    Ok(extract::quick_price(&html, url))
}

/// Storefront lookup: the current price for `url`, falling back to `stored`.
///
/// Never fails; an unknown result means "contact for price".
pub async fn current_price<C: Clock>(
    cache: &mut PriceCache<C>,
    source: &dyn PageSource,
    url: Option<&str>,
    stored: Option<i64>,
) -> Option<i64> {
    match url {
        Some(url) => cache.get(source, url).await.or(stored),
        None => stored,
    }
}
