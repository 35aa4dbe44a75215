//! Seams between the pipeline stages: page fetching and markup selectors.

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::CatalogError;

/// Anything that can hand back the HTML of a page.
///
/// [`crate::session::Session`] is the production implementation. The crawler,
/// price cache and verifier only see this trait.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches `url` and returns its body.
    ///
    /// # Errors
    /// * [`CatalogError::Fetch`] on network errors
    /// * [`CatalogError::Status`] on non-success responses
    async fn fetch_html(&self, url: &Url) -> Result<String, CatalogError>;
}

/// Source-specific selector overrides from the crawl plan.
///
/// Every list is tried before the built-in defaults for the same field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub product_container: Vec<String>,
    pub title: Vec<String>,
    pub price: Vec<String>,
    pub image: Vec<String>,
    pub link: Vec<String>,
    pub brand: Vec<String>,
}

/// Ordered CSS selector lists for the scoped-selector strategy.
#[derive(Debug, Clone)]
pub struct MarkupProfile {
    /// Container selector for individual products on a listing page
    pub product_container: Vec<String>,
    /// Title/name selectors within a product container
    pub title: Vec<String>,
    /// Price selectors; `content` is read before text
    pub price: Vec<String>,
    /// Image element selectors
    pub image: Vec<String>,
    /// Product link selectors within a product container
    pub link: Vec<String>,
    /// Brand selectors
    pub brand: Vec<String>,
}

impl Default for MarkupProfile {
    fn default() -> Self {
        Self {
            product_container: strings(&[
                r#"[itemtype*="schema.org/Product"]"#,
                ".product-card-wrapper",
                ".product-item",
                ".product-card",
                ".product-tile",
                "li.product",
                "article.product",
                "[data-product-id]",
                ".product",
            ]),
            title: strings(&[
                r#"[itemprop="name"]"#,
                ".product-title",
                ".product-name",
                ".product-item-link",
                ".card-title",
                "h2",
                "h3",
                "h1",
            ]),
            price: strings(&[
                r#"[itemprop="price"]"#,
                ".price .amount",
                ".product-price",
                ".price-box .price",
                ".price",
                "[data-price]",
            ]),
            image: strings(&[
                r#"[itemprop="image"]"#,
                ".product-image img",
                ".responsive-image__image",
                "img",
            ]),
            link: strings(&[
                r#"a[itemprop="url"]"#,
                ".product-title a",
                ".product-item-link",
                ".card-title a",
                "a[href]",
            ]),
            brand: strings(&[
                r#"[itemprop="brand"] [itemprop="name"]"#,
                r#"[itemprop="brand"]"#,
                ".product-brand",
                ".brand",
                ".manufacturer",
                ".card-subtitle",
            ]),
        }
    }
}

impl MarkupProfile {
    /// Built-in lists with the Source's own selectors placed first.
    pub fn with_overrides(overrides: &SiteSelectors) -> Self {
        let mut profile = Self::default();
        prepend(&mut profile.product_container, &overrides.product_container);
        prepend(&mut profile.title, &overrides.title);
        prepend(&mut profile.price, &overrides.price);
        prepend(&mut profile.image, &overrides.image);
        prepend(&mut profile.link, &overrides.link);
        prepend(&mut profile.brand, &overrides.brand);
        profile
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

fn prepend(target: &mut Vec<String>, first: &[String]) {
    if first.is_empty() {
        return;
    }
    let mut merged = first.to_vec();
    merged.extend(target.drain(..).filter(|s| !first.contains(s)));
    *target = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_come_first_without_duplicates() {
        let overrides = SiteSelectors {
            price: vec![".sale-price".into(), ".price".into()],
            ..SiteSelectors::default()
        };
        let profile = MarkupProfile::with_overrides(&overrides);
        assert_eq!(profile.price[0], ".sale-price");
        assert_eq!(profile.price[1], ".price");
        assert_eq!(profile.price.iter().filter(|s| *s == ".price").count(), 1);
        assert_eq!(profile.title, MarkupProfile::default().title);
    }
}
