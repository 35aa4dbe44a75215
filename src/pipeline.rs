use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{PriceCache, current_price};
use crate::config::{Settings, SourceSpec, load_sources};
use crate::crawler::{CrawlSettings, Crawler};
use crate::error::CatalogError;
use crate::extract;
use crate::models::Category;
use crate::session::Session;
use crate::store::{DatasetStore, WriteOutcome};
use crate::traits::{MarkupProfile, PageSource};
use crate::verify::{VerifyReport, Verifier, write_report};

/// Per-file result of a batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSummary {
    pub file: String,
    pub touched: usize,
    pub total: usize,
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files: Vec<FileSummary>,
    /// Files whose processing failed, with the error text
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    pub fn touched(&self) -> usize {
        self.files.iter().map(|f| f.touched).sum()
    }

    pub fn total(&self) -> usize {
        self.files.iter().map(|f| f.total).sum()
    }

    /// Fails when any file could not be processed, naming the failed files.
    ///
    /// # Errors
    /// When `failures` is not empty.
    pub fn ensure_ok(&self) -> Result<()> {
        if !self.failures.is_empty() {
            let files: Vec<&str> = self.failures.iter().map(|(file, _)| file.as_str()).collect();
            bail!("{} file(s) failed: {}", files.len(), files.join(", "));
        }
        Ok(())
    }

    pub fn log(&self, action: &str) {
        for file in &self.files {
            info!(
                action,
                file = %file.file,
                touched = file.touched,
                total = file.total,
                written = file.outcome == WriteOutcome::Written,
                "file done"
            );
        }
        for (file, reason) in &self.failures {
            error!(action, file = %file, "file failed: {reason}");
        }
        info!(
            action,
            touched = self.touched(),
            total = self.total(),
            failed = self.failures.len(),
            "run finished"
        );
    }
}

/// Batch entry points: crawl, price refresh, detail enrichment, verification.
#[derive(Clone)]
pub struct CatalogPipeline {
    settings: Settings,
    store: DatasetStore,
}

impl CatalogPipeline {
    pub fn new(settings: Settings) -> Self {
        let store = DatasetStore::new(settings.data_dir.clone());
        Self { settings, store }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// Builds the HTTP session and authenticates it.
    ///
    /// A configured cookie string bypasses login. With credentials, a failed
    /// login is fatal. Without either, the session stays anonymous.
    ///
    /// # Errors
    /// Missing origin, client construction, or [`CatalogError::Login`].
    pub async fn open_session(&self) -> Result<Session> {
        let origin = self.settings.require_origin()?.clone();
        if !self.settings.headless {
            info!("HEADLESS=false has no effect on the HTTP session");
        }
        let session = Session::new(origin.clone(), &self.settings.user_agent, self.settings.timeout)?;

        if let Some(cookie) = &self.settings.cookie {
            info!("using pre-authenticated cookie string; skipping login");
            return Ok(session.with_cookie_string(cookie));
        }

        match self.settings.credentials() {
            Some((identity, secret)) => {
                if !session.login(identity, secret).await {
                    return Err(CatalogError::Login {
                        origin: origin.to_string(),
                    }
                    .into());
                }
            }
            None => warn!("no credentials configured; crawling anonymously"),
        }
        Ok(session)
    }

    /// Crawls every allowed Source in the plan and merges it into its file.
    ///
    /// # Errors
    /// Plan loading and login failures abort the run. Per-file write failures
    /// are collected in the summary instead.
    pub async fn crawl(&self) -> Result<RunSummary> {
        let sources = load_sources(&self.settings.sources_path).with_context(|| {
            format!("load crawl plan {}", self.settings.sources_path.display())
        })?;
        let session = self.open_session().await.context("open session")?;

        let mut summary = RunSummary::default();
        for source in sources.iter().filter(|s| self.settings.allows_file(&s.file)) {
            info!(source = %source.name, file = %source.file, "crawling source");
            let categories = self.crawl_source(&session, source).await;
            match self.store.merge_into(&source.file, categories) {
                Ok((outcome, stats)) => summary.files.push(FileSummary {
                    file: source.file.clone(),
                    touched: stats.touched(),
                    total: stats.total,
                    outcome,
                }),
                Err(err) => {
                    error!(file = %source.file, "could not merge crawl: {err}");
                    summary.failures.push((source.file.clone(), err.to_string()));
                }
            }
        }

        summary.log("crawl");
        Ok(summary)
    }

    /// Crawls the categories of one Source. Invalid categories are skipped.
    pub async fn crawl_source(&self, source: &dyn PageSource, spec: &SourceSpec) -> Vec<Category> {
        let profile = MarkupProfile::with_overrides(&spec.selectors);
        let settings = CrawlSettings {
            max_pages: spec.max_pages(),
            delay: self.settings.request_delay,
            detail_fallback: true,
        };
        let mut crawler = Crawler::new(source, &profile, settings);

        let mut categories = Vec::new();
        for category in &spec.categories {
            let root = match spec.category_root(category, self.settings.origin.as_ref()) {
                Ok(root) => root,
                Err(err) => {
                    warn!(source = %spec.name, "skipping category: {err}");
                    continue;
                }
            };
            let (crawled, _stats) = crawler.crawl_category(&category.category, &[root]).await;
            categories.push(crawled);
        }
        categories
    }

    /// Fills missing prices (all prices when forced) through the price cache.
    ///
    /// # Errors
    /// Session setup failures. Per-file failures are collected in the summary.
    pub async fn refresh(&self, force: bool) -> Result<RunSummary> {
        let session = self.open_session().await.context("open session")?;
        let mut cache = PriceCache::new();
        self.refresh_with(&session, &mut cache, force || self.settings.force_refresh)
            .await
    }

    /// [`Self::refresh`] against an explicit page source and cache.
    ///
    /// # Errors
    /// When the data directory cannot be listed.
    pub async fn refresh_with(
        &self,
        source: &dyn PageSource,
        cache: &mut PriceCache,
        force: bool,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut pacer = Pacer::new(self.settings.request_delay);

        for file in self.allowed_files()? {
            let mut categories = match self.store.load(&file) {
                Ok(categories) => categories,
                Err(err) => {
                    summary.failures.push((file.clone(), err.to_string()));
                    continue;
                }
            };

            let mut touched = 0;
            let mut total = 0;
            for category in &mut categories {
                for item in &mut category.items {
                    total += 1;
                    let Some(url) = item.url.clone() else {
                        continue;
                    };
                    if item.price.is_some() && !force {
                        continue;
                    }
                    pacer.wait().await;
                    match cache.get(source, &url).await {
                        Some(price) if item.price != Some(price) => {
                            info!(title = %item.title, price = %crate::price::display(price), "price refreshed");
                            item.price = Some(price);
                            touched += 1;
                        }
                        Some(_) => {}
                        None => warn!(url = %url, "no live price; keeping stored value"),
                    }
                }
            }

            self.finish_file(&mut summary, file, &categories, touched, total);
        }

        summary.log("refresh");
        Ok(summary)
    }

    /// Deeper detail-page pass: description, tags, attributes and missing fields.
    ///
    /// # Errors
    /// Session setup failures. Per-file failures are collected in the summary.
    pub async fn enrich(&self, force: bool) -> Result<RunSummary> {
        let session = self.open_session().await.context("open session")?;
        self.enrich_with(&session, force || self.settings.force_refresh)
            .await
    }

    /// [`Self::enrich`] against an explicit page source.
    ///
    /// # Errors
    /// When the data directory cannot be listed.
    pub async fn enrich_with(&self, source: &dyn PageSource, force: bool) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut pacer = Pacer::new(self.settings.request_delay);
        let profile = MarkupProfile::default();

        for file in self.allowed_files()? {
            let mut categories = match self.store.load(&file) {
                Ok(categories) => categories,
                Err(err) => {
                    summary.failures.push((file.clone(), err.to_string()));
                    continue;
                }
            };

            let mut touched = 0;
            let mut total = 0;
            for category in &mut categories {
                for item in &mut category.items {
                    total += 1;
                    let Some(url) = item.url.as_deref().and_then(|u| Url::parse(u).ok()) else {
                        continue;
                    };
                    if item.description.is_some() && !force {
                        continue;
                    }
                    pacer.wait().await;
                    let html = match source.fetch_html(&url).await {
                        Ok(html) => html,
                        Err(err) => {
                            warn!(url = %url, "skipping enrichment: {err}");
                            continue;
                        }
                    };

                    let fields = extract::extract_product(&html, &url, &profile);
                    let details = extract::extract_details(&html, &url);
                    let mut changed = false;
                    for (slot, value) in [
                        (&mut item.image, fields.image),
                        (&mut item.brand, fields.brand),
                    ] {
                        if slot.is_none() && value.is_some() {
                            *slot = value;
                            changed = true;
                        }
                    }
                    if item.price.is_none() && fields.price.is_some() {
                        item.price = fields.price;
                        changed = true;
                    }
                    if details.description.is_some() && item.description != details.description {
                        item.description = details.description;
                        changed = true;
                    }
                    if !details.tags.is_empty() && item.tags.as_ref() != Some(&details.tags) {
                        item.tags = Some(details.tags);
                        changed = true;
                    }
                    if !details.attrs.is_empty() && item.attrs.as_ref() != Some(&details.attrs) {
                        item.attrs = Some(details.attrs);
                        changed = true;
                    }
                    if changed {
                        touched += 1;
                    }
                }
            }

            self.finish_file(&mut summary, file, &categories, touched, total);
        }

        summary.log("enrich");
        Ok(summary)
    }

    /// Re-checks stored prices against the live source and writes the CSV report.
    ///
    /// # Errors
    /// Session setup, file loading or report writing failures.
    pub async fn verify(&self, out_dir: Option<PathBuf>) -> Result<(VerifyReport, PathBuf)> {
        let session = self.open_session().await.context("open session")?;
        self.verify_with(&session, out_dir).await
    }

    /// [`Self::verify`] against an explicit page source.
    ///
    /// # Errors
    /// File loading or report writing failures.
    pub async fn verify_with(
        &self,
        source: &dyn PageSource,
        out_dir: Option<PathBuf>,
    ) -> Result<(VerifyReport, PathBuf)> {
        let mut datasets = Vec::new();
        for file in self.allowed_files()? {
            let categories = self
                .store
                .load(&file)
                .with_context(|| format!("load {file}"))?;
            datasets.push((file, categories));
        }

        let verifier = Verifier {
            tolerance_pct: self.settings.verify_tolerance,
            limit: self.settings.verify_limit,
        };
        let report = verifier.verify(source, &datasets).await;
        let dir = out_dir.unwrap_or_else(|| self.store.dir().to_path_buf());
        let path = write_report(&dir, Utc::now(), &report.mismatches).context("write report")?;
        info!(path = %path.display(), flagged = report.mismatches.len(), "verification report written");
        Ok((report, path))
    }

    /// Storefront-style lookup for one URL, falling back to `stored`.
    ///
    /// # Errors
    /// Only session setup failures; the lookup itself never fails.
    pub async fn lookup_price(&self, url: &str, stored: Option<i64>) -> Result<Option<i64>> {
        let session = self.open_session().await.context("open session")?;
        let mut cache = PriceCache::new();
        Ok(current_price(&mut cache, &session, Some(url), stored).await)
    }

    fn allowed_files(&self) -> Result<Vec<String>> {
        let files = self
            .store
            .list_files()
            .with_context(|| format!("list data dir {}", self.store.dir().display()))?;
        Ok(files
            .into_iter()
            .filter(|file| self.settings.allows_file(file))
            .collect())
    }

    fn finish_file(
        &self,
        summary: &mut RunSummary,
        file: String,
        categories: &[Category],
        touched: usize,
        total: usize,
    ) {
        match self.store.write_if_changed(&file, categories) {
            Ok(outcome) => summary.files.push(FileSummary {
                file,
                touched,
                total,
                outcome,
            }),
            Err(err) => {
                error!(file = %file, "could not write dataset: {err}");
                summary.failures.push((file, err.to_string()));
            }
        }
    }
}

/// Fixed courtesy delay between requests, skipped before the first one.
struct Pacer {
    delay: Duration,
    started: bool,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: false,
        }
    }

    async fn wait(&mut self) {
        if self.started && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.started = true;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::models::Item;

    struct Pages(HashMap<String, String>);

    #[async_trait]
    impl PageSource for Pages {
        async fn fetch_html(&self, url: &Url) -> Result<String, CatalogError> {
            self.0.get(url.as_str()).cloned().ok_or_else(|| CatalogError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn pipeline(dir: &std::path::Path) -> CatalogPipeline {
        let settings = Settings {
            data_dir: dir.to_path_buf(),
            request_delay: Duration::ZERO,
            ..Settings::default()
        };
        CatalogPipeline::new(settings)
    }

    fn seed(store: &DatasetStore) {
        seed_as(store, "acme.json");
    }

    fn seed_as(store: &DatasetStore, file: &str) {
        let mut category = Category::new("Boots", "https://shop.example/c/boots");
        let mut priced = Item::new("a", "Priced");
        priced.price = Some(100);
        priced.url = Some("https://shop.example/p/a".into());
        let mut unpriced = Item::new("b", "Unpriced");
        unpriced.url = Some("https://shop.example/p/b".into());
        category.items = vec![priced, unpriced, Item::new("c", "No url")];
        store.write_if_changed(file, &[category]).unwrap();
    }

    fn detail(price: &str) -> String {
        format!(
            r#"<html><head><script type="application/ld+json">
{{"@type":"Product","name":"x","description":"Sturdy.","keywords":"a, b","image":"/img/x.jpg",
  "additionalProperty":[{{"name":"Material","value":"Leather"}}],"offers":{{"price":"{price}"}}}}
</script></head><body></body></html>"#
        )
    }

    fn site() -> Pages {
        Pages(HashMap::from([
            ("https://shop.example/p/a".to_string(), detail("2.00")),
            ("https://shop.example/p/b".to_string(), detail("3.00")),
        ]))
    }

    #[tokio::test]
    async fn refresh_fills_only_missing_prices_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        seed(pipeline.store());

        let summary = pipeline
            .refresh_with(&site(), &mut PriceCache::new(), false)
            .await
            .unwrap();
        assert_eq!(summary.touched(), 1);
        assert_eq!(summary.total(), 3);
        let items = &pipeline.store().load("acme.json").unwrap()[0].items;
        assert_eq!(items[0].price, Some(100));
        assert_eq!(items[1].price, Some(300));

        let summary = pipeline
            .refresh_with(&site(), &mut PriceCache::new(), true)
            .await
            .unwrap();
        assert_eq!(summary.touched(), 1);
        let items = &pipeline.store().load("acme.json").unwrap()[0].items;
        assert_eq!(items[0].price, Some(200));
    }

    #[tokio::test]
    async fn unreadable_file_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        std::fs::create_dir(dir.path().join("acme.json")).unwrap();
        seed_as(pipeline.store(), "zeta.json");

        let summary = pipeline
            .refresh_with(&site(), &mut PriceCache::new(), false)
            .await
            .unwrap();

        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "acme.json");
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].file, "zeta.json");
        assert_eq!(summary.files[0].outcome, WriteOutcome::Written);
        let items = &pipeline.store().load("zeta.json").unwrap()[0].items;
        assert_eq!(items[1].price, Some(300));

        let err = summary.ensure_ok().unwrap_err();
        assert!(err.to_string().contains("acme.json"));
        assert!(RunSummary::default().ensure_ok().is_ok());
    }

    #[tokio::test]
    async fn refresh_respects_the_file_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        seed(pipeline.store());
        pipeline.settings.only_files = Some(vec!["other.json".into()]);

        let summary = pipeline
            .refresh_with(&site(), &mut PriceCache::new(), true)
            .await
            .unwrap();
        assert!(summary.files.is_empty());
    }

    #[tokio::test]
    async fn enrich_adds_details_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        seed(pipeline.store());

        let summary = pipeline.enrich_with(&site(), false).await.unwrap();
        assert_eq!(summary.touched(), 2);
        let items = &pipeline.store().load("acme.json").unwrap()[0].items;
        assert_eq!(items[0].price, Some(100));
        assert_eq!(items[0].description.as_deref(), Some("Sturdy."));
        assert_eq!(items[0].tags, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(
            items[0].attrs.as_ref().and_then(|a| a.get("Material")).map(String::as_str),
            Some("Leather")
        );
        assert_eq!(items[0].image.as_deref(), Some("https://shop.example/img/x.jpg"));
        assert_eq!(items[1].price, Some(300));

        let again = pipeline.enrich_with(&site(), false).await.unwrap();
        assert_eq!(again.touched(), 0);
        assert_eq!(again.files[0].outcome, WriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn verify_writes_a_report_next_to_the_data() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        seed(pipeline.store());

        let (report, path) = pipeline.verify_with(&site(), None).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.mismatches.len(), 2);
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }
}
