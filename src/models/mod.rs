//! Dataset records as they appear in a Source file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// One product record.
///
/// `price` is in minor currency units. `None` means the price is not known yet.
/// It never means zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<BTreeMap<String, String>>,
}

impl Item {
    /// Builds an item with only identity and title set.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            brand: None,
            price: None,
            image: None,
            url: None,
            description: None,
            tags: None,
            attrs: None,
        }
    }

    /// Copies every field `other` populated, keeping ours where `other` is empty.
    /// The image is the exception: the first one discovered is kept.
    ///
    /// Returns true when anything changed.
    pub fn overlay(&mut self, other: &Item) -> bool {
        let before = self.clone();
        if !other.title.trim().is_empty() {
            self.title.clone_from(&other.title);
        }
        overlay_field(&mut self.brand, &other.brand);
        overlay_field(&mut self.price, &other.price);
        fill_field(&mut self.image, &other.image);
        overlay_field(&mut self.url, &other.url);
        overlay_field(&mut self.description, &other.description);
        overlay_field(&mut self.tags, &other.tags);
        overlay_field(&mut self.attrs, &other.attrs);
        *self != before
    }

    /// Fills only fields that are still empty. Known values are never replaced.
    pub fn fill_missing(&mut self, other: &Item) -> bool {
        let before = self.clone();
        fill_field(&mut self.brand, &other.brand);
        fill_field(&mut self.price, &other.price);
        fill_field(&mut self.image, &other.image);
        fill_field(&mut self.url, &other.url);
        fill_field(&mut self.description, &other.description);
        fill_field(&mut self.tags, &other.tags);
        fill_field(&mut self.attrs, &other.attrs);
        *self != before
    }

    pub fn needs_detail_fallback(&self) -> bool {
        self.url.is_some() && (self.image.is_none() || self.price.is_none())
    }
}

fn overlay_field<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        target.clone_from(value);
    }
}

fn fill_field<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if target.is_none() {
        target.clone_from(value);
    }
}

/// One crawled listing scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub category: String,
    pub url: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Category {
    pub fn new(category: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            url: url.into(),
            items: Vec::new(),
        }
    }

    /// Appends `item` unless one with the same id is already present.
    pub fn push_unique(&mut self, item: Item) -> bool {
        if self.items.iter().any(|existing| existing.id == item.id) {
            return false;
        }
        self.items.push(item);
        true
    }
}

/// Deep-enrichment fields read from a product's own page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Details {
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub attrs: BTreeMap<String, String>,
}

impl Details {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.tags.is_empty() && self.attrs.is_empty()
    }
}

/// Canonical form of a detail-page URL: no fragment, no query, no trailing slash.
pub fn canonical_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical.set_query(None);
    let mut path = canonical.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    canonical.set_path(&path);
    canonical
}

/// Stable item id: md5 of the canonical detail URL, otherwise of title and context.
pub fn item_id(url: Option<&Url>, sku: Option<&str>, title: &str, context: &str) -> String {
    match (url, sku) {
        (Some(url), _) => format!("{:x}", md5::compute(canonical_url(url).as_str())),
        (None, Some(sku)) => format!("{:x}", md5::compute(format!("sku:{sku}"))),
        (None, None) => format!(
            "{:x}",
            md5::compute(format!("{}|{}", title.trim().to_lowercase(), context))
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_never_clears_known_fields() {
        let mut stored = Item::new("a", "Boot");
        stored.price = Some(12999);
        stored.image = Some("https://shop.example/boot.jpg".into());

        let fresh = Item::new("a", "Boot v2");
        assert!(stored.overlay(&fresh));
        assert_eq!(stored.title, "Boot v2");
        assert_eq!(stored.price, Some(12999));
        assert!(stored.image.is_some());
    }

    #[test]
    fn overlay_keeps_the_first_image() {
        let mut stored = Item::new("a", "Boot");
        stored.image = Some("https://shop.example/first.jpg".into());
        let mut fresh = Item::new("a", "Boot");
        fresh.image = Some("https://shop.example/second.jpg".into());
        fresh.price = Some(500);

        assert!(stored.overlay(&fresh));
        assert_eq!(stored.image.as_deref(), Some("https://shop.example/first.jpg"));
        assert_eq!(stored.price, Some(500));
    }

    #[test]
    fn fill_missing_keeps_existing_values() {
        let mut item = Item::new("a", "Boot");
        item.price = Some(100);
        let mut detail = Item::new("a", "Other title");
        detail.price = Some(200);
        detail.image = Some("https://shop.example/i.jpg".into());

        assert!(item.fill_missing(&detail));
        assert_eq!(item.title, "Boot");
        assert_eq!(item.price, Some(100));
        assert_eq!(item.image.as_deref(), Some("https://shop.example/i.jpg"));
    }

    #[test]
    fn ids_ignore_query_fragment_and_trailing_slash() {
        let a = Url::parse("https://shop.example/p/boot/?ref=list#top").unwrap();
        let b = Url::parse("https://shop.example/p/boot").unwrap();
        assert_eq!(item_id(Some(&a), None, "x", "y"), item_id(Some(&b), None, "z", "w"));
    }

    #[test]
    fn ids_without_url_depend_on_title_and_context() {
        let one = item_id(None, None, "Boot", "https://shop.example/c/boots");
        let two = item_id(None, None, "boot ", "https://shop.example/c/boots");
        let three = item_id(None, None, "Boot", "https://shop.example/c/shoes");
        assert_eq!(one, two);
        assert_ne!(one, three);
    }
}
