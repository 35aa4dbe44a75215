//! Bounded breadth-first crawl of one category's listing pages.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::extract::{self, ListingPage};
use crate::models::{Category, Item};
use crate::traits::{MarkupProfile, PageSource};

/// Default ceiling on listing pages fetched per category root.
pub const DEFAULT_MAX_PAGES: usize = 40;

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Hard ceiling on listing pages per category root
    pub max_pages: usize,
    /// Courtesy pause between two requests
    pub delay: Duration,
    /// Fetch a product's own page when the listing left image or price empty
    pub detail_fallback: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            delay: Duration::from_millis(400),
            detail_fallback: true,
        }
    }
}

/// Counters for one category crawl, logged by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub single_item_pages: usize,
    pub detail_fetches: usize,
    pub hit_page_ceiling: bool,
}

pub struct Crawler<'a> {
    source: &'a dyn PageSource,
    profile: &'a MarkupProfile,
    settings: CrawlSettings,
    requests: usize,
}

impl<'a> Crawler<'a> {
    pub fn new(source: &'a dyn PageSource, profile: &'a MarkupProfile, settings: CrawlSettings) -> Self {
        Self {
            source,
            profile,
            settings,
            requests: 0,
        }
    }

    /// Crawls every listing page reachable from `roots` through pagination links.
    ///
    /// The worklist is FIFO, so the visiting order is deterministic. Each
    /// normalized URL is fetched at most once, and never more than
    /// `max_pages` pages are fetched in total.
    pub async fn crawl_category(&mut self, label: &str, roots: &[Url]) -> (Category, CrawlStats) {
        let root_label = roots.first().map(Url::to_string).unwrap_or_default();
        let mut category = Category::new(label, root_label);
        let mut stats = CrawlStats::default();

        let mut worklist: VecDeque<Url> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();
        for root in roots {
            if seen.insert(crawl_key(root)) {
                worklist.push_back(root.clone());
            }
        }

        info!(category = label, roots = roots.len(), "starting category crawl");

        while let Some(url) = worklist.pop_front() {
            if stats.pages_fetched >= self.settings.max_pages {
                info!(
                    category = label,
                    max_pages = self.settings.max_pages,
                    pending = worklist.len() + 1,
                    "reached page ceiling"
                );
                stats.hit_page_ceiling = true;
                break;
            }

            stats.pages_fetched += 1;
            info!(category = label, page = stats.pages_fetched, url = %url, "fetching listing page");
            let html = match self.get(&url).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(url = %url, "skipping listing page: {err}");
                    stats.pages_failed += 1;
                    continue;
                }
            };

            let ListingPage {
                items,
                next_page,
                page_links,
            } = extract::extract_listing(&html, &url, self.profile);

            if items.is_empty() {
                match extract::extract_single_item(&html, &url, self.profile) {
                    Some(item) => {
                        debug!(url = %url, "listing was empty; read it as a detail page");
                        stats.single_item_pages += 1;
                        category.push_unique(item);
                    }
                    None => debug!(url = %url, "page yielded no items"),
                }
            } else {
                let found = items.len();
                let added = items
                    .into_iter()
                    .filter(|item| category.push_unique(item.clone()))
                    .count();
                debug!(url = %url, found, added, "extracted listing items");
            }

            for link in next_page.into_iter().chain(page_links) {
                if seen.insert(crawl_key(&link)) {
                    worklist.push_back(link);
                }
            }
        }

        if self.settings.detail_fallback {
            stats.detail_fetches = self.fill_from_detail_pages(&mut category.items).await;
        }

        info!(
            category = label,
            items = category.items.len(),
            pages = stats.pages_fetched,
            failed = stats.pages_failed,
            "category crawl finished"
        );
        (category, stats)
    }

    /// Fetches the own page of every item missing an image or a price and fills
    /// only the missing fields.
    pub async fn fill_from_detail_pages(&mut self, items: &mut [Item]) -> usize {
        let mut fetched = 0;
        for item in items.iter_mut().filter(|item| item.needs_detail_fallback()) {
            let Some(url) = item.url.as_deref().and_then(|u| Url::parse(u).ok()) else {
                continue;
            };
            fetched += 1;
            let html = match self.get(&url).await {
                Ok(html) => html,
                Err(err) => {
                    warn!(url = %url, "skipping detail fallback: {err}");
                    continue;
                }
            };
            let fields = extract::extract_product(&html, &url, self.profile);
            if item.image.is_none() {
                item.image = fields.image;
            }
            if item.price.is_none() {
                item.price = fields.price;
            }
            if item.brand.is_none() {
                item.brand = fields.brand;
            }
        }
        fetched
    }

    /// One request, preceded by the courtesy delay unless it is the first.
    async fn get(&mut self, url: &Url) -> Result<String, crate::error::CatalogError> {
        if self.requests > 0 && !self.settings.delay.is_zero() {
            tokio::time::sleep(self.settings.delay).await;
        }
        self.requests += 1;
        self.source.fetch_html(url).await
    }
}

/// Seen-set key: fragment and trailing slash dropped, query pairs sorted.
/// `page=1` is dropped too, since it names the unpaginated first page.
///
/// The fetch itself still uses the URL as discovered.
pub fn crawl_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, v)| !k.is_empty() && !(k == "page" && v == "1"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        key.set_query(None);
    } else {
        key.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let mut path = key.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    key.set_path(&path);
    key.to_string()
}
