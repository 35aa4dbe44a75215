//! Drift detection: stored prices against freshly scraped ones.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::cache::fetch_live_price;
use crate::error::CatalogError;
use crate::models::Category;
use crate::traits::PageSource;

pub const DEFAULT_TOLERANCE_PCT: f64 = 1.0;

/// Why an item landed in the report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Finding {
    /// Live price differs from the stored one by more than the tolerance.
    Drift { diff_pct: f64 },
    /// The item has no positive stored price to compare against.
    NoStoredPrice,
    /// The live page could not be fetched or showed no price.
    NoLivePrice,
}

/// One flagged item.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    pub file: String,
    pub category: String,
    pub title: String,
    pub url: String,
    pub stored: Option<i64>,
    pub scraped: Option<i64>,
    pub finding: Finding,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    pub checked: usize,
    pub within_tolerance: usize,
    pub mismatches: Vec<Mismatch>,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    file: &'a str,
    category: &'a str,
    title: &'a str,
    url: &'a str,
    stored_cents: Option<i64>,
    scraped_cents: Option<i64>,
    diff_pct: Option<String>,
}

/// Percentage drift of `live` from `stored`; `None` unless `stored` is positive.
pub fn drift_pct(stored: Option<i64>, live: i64) -> Option<f64> {
    let stored = stored.filter(|s| *s > 0)?;
    Some(((live - stored).abs() as f64 * 100.0) / stored as f64)
}

/// Classifies one stored/live pair. `None` means the item is within tolerance.
pub fn classify(stored: Option<i64>, live: Option<i64>, tolerance_pct: f64) -> Option<Finding> {
    let Some(live) = live else {
        return Some(Finding::NoLivePrice);
    };
    match drift_pct(stored, live) {
        None => Some(Finding::NoStoredPrice),
        Some(diff_pct) if diff_pct > tolerance_pct => Some(Finding::Drift { diff_pct }),
        Some(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    pub tolerance_pct: f64,
    /// Maximum number of items to check across all files.
    pub limit: Option<usize>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self {
            tolerance_pct: DEFAULT_TOLERANCE_PCT,
            limit: None,
        }
    }
}

impl Verifier {
    /// Re-fetches the live price of every stored item that has a URL.
    ///
    /// Always goes to the source; the price cache is bypassed.
    pub async fn verify(
        &self,
        source: &dyn PageSource,
        datasets: &[(String, Vec<Category>)],
    ) -> VerifyReport {
        let mut report = VerifyReport::default();

        'files: for (file, categories) in datasets {
            for category in categories {
                for item in &category.items {
                    let Some(raw_url) = item.url.as_deref() else {
                        continue;
                    };
                    if self.limit.is_some_and(|limit| report.checked >= limit) {
                        break 'files;
                    }
                    report.checked += 1;

                    let live = match Url::parse(raw_url) {
                        Ok(url) => match fetch_live_price(source, &url).await {
                            Ok(price) => price,
                            Err(err) => {
                                warn!(url = raw_url, "live price fetch failed: {err}");
                                None
                            }
                        },
                        Err(err) => {
                            warn!(url = raw_url, "stored url is invalid: {err}");
                            None
                        }
                    };

                    match classify(item.price, live, self.tolerance_pct) {
                        None => report.within_tolerance += 1,
                        Some(finding) => report.mismatches.push(Mismatch {
                            file: file.clone(),
                            category: category.category.clone(),
                            title: item.title.clone(),
                            url: raw_url.to_string(),
                            stored: item.price,
                            scraped: live,
                            finding,
                        }),
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            within_tolerance = report.within_tolerance,
            flagged = report.mismatches.len(),
            "verification finished"
        );
        report
    }
}

/// Report file name for a run started at `at`, to the millisecond.
pub fn report_file_name(at: DateTime<Utc>) -> String {
    format!("price-verify-{}.csv", at.format("%Y%m%d-%H%M%S-%3f"))
}

/// Writes the flagged items as CSV into `dir` and returns the file path.
///
/// # Errors
/// [`CatalogError::Persistence`] when the file cannot be written.
pub fn write_report(
    dir: &Path,
    at: DateTime<Utc>,
    mismatches: &[Mismatch],
) -> Result<PathBuf, CatalogError> {
    std::fs::create_dir_all(dir).map_err(|e| CatalogError::persistence(dir, e))?;
    let path = dir.join(report_file_name(at));
    let to_io = |e: csv::Error| CatalogError::persistence(&path, std::io::Error::other(e));

    let mut writer = csv::Writer::from_path(&path).map_err(to_io)?;
    if mismatches.is_empty() {
        writer
            .write_record([
                "file",
                "category",
                "title",
                "url",
                "stored_cents",
                "scraped_cents",
                "diff_pct",
            ])
            .map_err(to_io)?;
    }
    for mismatch in mismatches {
        let diff_pct = match mismatch.finding {
            Finding::Drift { diff_pct } => Some(format!("{diff_pct:.2}")),
            Finding::NoStoredPrice | Finding::NoLivePrice => None,
        };
        writer
            .serialize(CsvRow {
                file: &mismatch.file,
                category: &mismatch.category,
                title: &mismatch.title,
                url: &mismatch.url,
                stored_cents: mismatch.stored,
                scraped_cents: mismatch.scraped,
                diff_pct,
            })
            .map_err(to_io)?;
    }
    writer
        .flush()
        .map_err(|e| CatalogError::persistence(&path, e))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::models::Item;

    #[test]
    fn tolerance_boundary_is_inclusive() {
        assert_eq!(classify(Some(10000), Some(10100), 1.0), None);
        assert!(matches!(
            classify(Some(10000), Some(10101), 1.0),
            Some(Finding::Drift { .. })
        ));
        assert!(matches!(
            classify(Some(10000), Some(9899), 1.0),
            Some(Finding::Drift { .. })
        ));
    }

    #[test]
    fn missing_prices_are_distinct_findings() {
        assert_eq!(classify(None, Some(100), 1.0), Some(Finding::NoStoredPrice));
        assert_eq!(classify(Some(0), Some(100), 1.0), Some(Finding::NoStoredPrice));
        assert_eq!(classify(Some(100), None, 1.0), Some(Finding::NoLivePrice));
    }

    struct Prices(HashMap<String, String>);

    #[async_trait]
    impl PageSource for Prices {
        async fn fetch_html(&self, url: &Url) -> Result<String, CatalogError> {
            self.0.get(url.as_str()).cloned().ok_or_else(|| CatalogError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn page(price: &str) -> String {
        format!(r#"<script type="application/ld+json">{{"@type":"Product","name":"x","offers":{{"price":"{price}"}}}}</script>"#)
    }

    fn item(id: &str, price: Option<i64>, url: Option<&str>) -> Item {
        let mut item = Item::new(id, format!("Item {id}"));
        item.price = price;
        item.url = url.map(ToString::to_string);
        item
    }

    fn dataset() -> Vec<(String, Vec<Category>)> {
        let mut category = Category::new("Boots", "https://shop.example/c/boots");
        category.items = vec![
            item("a", Some(10000), Some("https://shop.example/p/a")),
            item("b", Some(10000), Some("https://shop.example/p/b")),
            item("c", None, Some("https://shop.example/p/c")),
            item("d", Some(500), Some("https://shop.example/p/gone")),
            item("e", Some(500), None),
        ];
        vec![("acme.json".to_string(), vec![category])]
    }

    fn source() -> Prices {
        Prices(HashMap::from([
            ("https://shop.example/p/a".to_string(), page("101.00")),
            ("https://shop.example/p/b".to_string(), page("110.00")),
            ("https://shop.example/p/c".to_string(), page("5.00")),
        ]))
    }

    #[tokio::test]
    async fn reports_only_flagged_items() {
        let report = Verifier::default().verify(&source(), &dataset()).await;
        assert_eq!(report.checked, 4);
        assert_eq!(report.within_tolerance, 1);
        let titles: Vec<_> = report.mismatches.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Item b", "Item c", "Item d"]);
        assert_eq!(report.mismatches[0].finding, Finding::Drift { diff_pct: 10.0 });
        assert_eq!(report.mismatches[1].finding, Finding::NoStoredPrice);
        assert_eq!(report.mismatches[2].finding, Finding::NoLivePrice);
    }

    #[tokio::test]
    async fn limit_caps_the_number_of_checks() {
        let verifier = Verifier {
            limit: Some(2),
            ..Verifier::default()
        };
        let report = verifier.verify(&source(), &dataset()).await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.mismatches.len(), 1);
    }

    #[test]
    fn runs_within_the_same_second_get_separate_reports() {
        let dir = tempfile::tempdir().unwrap();
        let first = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let second = first + chrono::Duration::milliseconds(1);
        assert_eq!(report_file_name(second), "price-verify-20260304-050607-001.csv");

        let a = write_report(dir.path(), first, &[]).unwrap();
        let b = write_report(dir.path(), second, &[]).unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
    }

    #[tokio::test]
    async fn csv_report_has_the_expected_header_and_rows() {
        let report = Verifier::default().verify(&source(), &dataset()).await;
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();

        let path = write_report(dir.path(), at, &report.mismatches).unwrap();
        assert!(path.ends_with("price-verify-20260304-050607-000.csv"));

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "file,category,title,url,stored_cents,scraped_cents,diff_pct");
        assert_eq!(lines[1], "acme.json,Boots,Item b,https://shop.example/p/b,10000,11000,10.00");
        assert_eq!(lines[2], "acme.json,Boots,Item c,https://shop.example/p/c,,500,");
        assert_eq!(lines[3], "acme.json,Boots,Item d,https://shop.example/p/gone,500,,");
    }

    #[test]
    fn empty_report_still_has_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let path = write_report(dir.path(), at, &[]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.trim_end(), "file,category,title,url,stored_cents,scraped_cents,diff_pct");
    }
}
