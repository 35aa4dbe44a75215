//! Product field extraction from fetched HTML.
//!
//! Extraction runs an ordered list of pure strategies over a scope (a whole
//! document or one product card). Each strategy returns a partial [`FieldSet`].
//! For every field the first strategy that produced a value wins, so a title
//! from JSON-LD can sit next to a price found by the generic heuristics.
//!
//! All functions here are synchronous and take the HTML as `&str`. A parsed
//! [`Html`] is not `Send` and must never live across an `.await`.

mod pagination;
mod selectors;
mod structured;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::models::{Details, Item, canonical_url, item_id};
use crate::traits::MarkupProfile;

pub use pagination::{next_page, numbered_pages};
pub use selectors::{generic_heuristics, image_candidate, regex_fallback, scoped_selectors};
pub use structured::{structured_data, structured_products};

/// Partial product record produced by one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    pub title: Option<String>,
    pub price: Option<i64>,
    pub image: Option<String>,
    pub brand: Option<String>,
    pub url: Option<String>,
    pub sku: Option<String>,
}

impl FieldSet {
    /// Takes each field from `other` only where ours is still empty.
    pub fn fill_from(&mut self, other: FieldSet) {
        fill(&mut self.title, other.title);
        fill(&mut self.price, other.price);
        fill(&mut self.image, other.image);
        fill(&mut self.brand, other.brand);
        fill(&mut self.url, other.url);
        fill(&mut self.sku, other.sku);
    }

    pub fn is_complete(&self) -> bool {
        self.title.is_some() && self.price.is_some() && self.image.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn fill<T>(target: &mut Option<T>, value: Option<T>) {
    if target.is_none() {
        *target = value;
    }
}

/// Inputs shared by every strategy.
#[derive(Debug, Clone, Copy)]
pub struct ExtractCtx<'a> {
    /// URL the document was fetched from; relative links resolve against it.
    pub base: &'a Url,
    pub profile: &'a MarkupProfile,
    /// True when the scope is a product's own page rather than a listing card.
    pub detail: bool,
}

pub type Strategy = fn(ElementRef<'_>, &ExtractCtx<'_>) -> FieldSet;

/// Full strategy order used for listing cards and detail pages.
pub const PRODUCT_STRATEGIES: &[(&str, Strategy)] = &[
    ("structured-data", structured_data),
    ("scoped-selectors", scoped_selectors),
    ("generic-heuristics", generic_heuristics),
    ("regex-fallback", regex_fallback),
];

/// Reduced order used by the price cache: structured data, then the regex.
pub const PRICE_STRATEGIES: &[(&str, Strategy)] = &[
    ("structured-data", structured_data),
    ("regex-fallback", regex_fallback),
];

/// Runs `strategies` in order and merges their output field by field.
pub fn run_strategies(
    scope: ElementRef<'_>,
    ctx: &ExtractCtx<'_>,
    strategies: &[(&str, Strategy)],
) -> FieldSet {
    let mut fields = FieldSet::default();
    for (name, strategy) in strategies {
        if fields.is_complete() && fields.brand.is_some() && fields.url.is_some() {
            break;
        }
        let found = strategy(scope, ctx);
        if found.is_empty() {
            debug!(strategy = name, "strategy found nothing");
            continue;
        }
        fields.fill_from(found);
    }
    fields
}

/// Everything a listing page yields.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub items: Vec<Item>,
    pub next_page: Option<Url>,
    pub page_links: Vec<Url>,
}

/// Extracts product cards and pagination links from a listing page.
///
/// Cards without a resolvable title are dropped. Items are deduplicated by id,
/// first seen wins.
pub fn extract_listing(html: &str, page_url: &Url, profile: &MarkupProfile) -> ListingPage {
    let document = Html::parse_document(html);
    let ctx = ExtractCtx {
        base: page_url,
        profile,
        detail: false,
    };

    let cards: Vec<FieldSet> = product_cards(&document, profile)
        .into_iter()
        .map(|card| run_strategies(card, &ctx, PRODUCT_STRATEGIES))
        .collect();
    let structured = structured_products(document.root_element(), page_url);

    let mut used = vec![false; structured.len()];
    let mut drafts = Vec::with_capacity(cards.len() + structured.len());
    for card in cards {
        let matched = card.url.as_ref().and_then(|url| {
            structured
                .iter()
                .enumerate()
                .position(|(idx, product)| !used[idx] && product.fields.url.as_ref() == Some(url))
        });
        match matched {
            Some(idx) => {
                used[idx] = true;
                let mut merged = structured[idx].fields.clone();
                merged.fill_from(card);
                drafts.push(merged);
            }
            None => drafts.push(card),
        }
    }
    drafts.extend(
        structured
            .into_iter()
            .zip(used)
            .filter(|(_, used)| !used)
            .map(|(product, _)| product.fields),
    );

    let context_brand = brand_from_url(page_url);
    let mut items: Vec<Item> = Vec::new();
    for draft in drafts {
        let Some(item) = item_from_fields(draft, page_url, context_brand.as_deref()) else {
            debug!(page = %page_url, "dropping card without a title");
            continue;
        };
        if !items.iter().any(|existing| existing.id == item.id) {
            items.push(item);
        }
    }

    ListingPage {
        items,
        next_page: next_page(&document, page_url),
        page_links: numbered_pages(&document, page_url),
    }
}

/// Extracts one product from its own detail page.
pub fn extract_product(html: &str, page_url: &Url, profile: &MarkupProfile) -> FieldSet {
    product_fields(&Html::parse_document(html), page_url, profile)
}

fn product_fields(document: &Html, page_url: &Url, profile: &MarkupProfile) -> FieldSet {
    let ctx = ExtractCtx {
        base: page_url,
        profile,
        detail: true,
    };
    let mut fields = run_strategies(document.root_element(), &ctx, PRODUCT_STRATEGIES);
    if fields.url.is_none() {
        fields.url = Some(canonical_url(page_url).to_string());
    }
    fields
}

/// Treats a whole page as a single product. Used when a listing yields nothing.
///
/// The page must show a product: a JSON-LD `Product` or a resolvable price.
/// Empty categories and "no results" pages only have a heading and yield `None`.
pub fn extract_single_item(html: &str, page_url: &Url, profile: &MarkupProfile) -> Option<Item> {
    let document = Html::parse_document(html);
    let fields = product_fields(&document, page_url, profile);
    if fields.price.is_none() && structured_products(document.root_element(), page_url).is_empty() {
        debug!(page = %page_url, "page shows no product; not reading it as one");
        return None;
    }
    item_from_fields(fields, page_url, brand_from_url(page_url).as_deref())
}

/// Price-only extraction used by the enrichment cache and the verifier.
pub fn quick_price(html: &str, page_url: &Url) -> Option<i64> {
    let document = Html::parse_document(html);
    let profile = MarkupProfile::default();
    let ctx = ExtractCtx {
        base: page_url,
        profile: &profile,
        detail: true,
    };
    run_strategies(document.root_element(), &ctx, PRICE_STRATEGIES).price
}

/// Deep-enrichment fields: description, tags and the attribute table.
pub fn extract_details(html: &str, page_url: &Url) -> Details {
    let document = Html::parse_document(html);
    let mut details = structured::structured_details(document.root_element(), page_url);
    selectors::markup_details(document.root_element(), &mut details);
    details
}

/// Turns a draft into an [`Item`]. Returns `None` when no title was found.
pub fn item_from_fields(
    fields: FieldSet,
    page_url: &Url,
    context_brand: Option<&str>,
) -> Option<Item> {
    let title = fields.title.filter(|t| !t.trim().is_empty())?;
    let url = fields
        .url
        .as_deref()
        .and_then(|u| page_url.join(u).ok())
        .map(|u| canonical_url(&u));
    let context = canonical_url(page_url);
    let id = item_id(
        url.as_ref(),
        fields.sku.as_deref(),
        &title,
        context.as_str(),
    );

    let mut item = Item::new(id, title.trim());
    item.price = fields.price;
    item.image = fields.image;
    item.url = url.map(|u| u.to_string());
    item.brand = fields
        .brand
        .or_else(|| context_brand.map(ToString::to_string));
    Some(item)
}

/// Brand implied by a listing URL's query, e.g. `?brand=Acme`.
pub fn brand_from_url(url: &Url) -> Option<String> {
    const KEYS: &[&str] = &["brand", "marke", "manufacturer", "hersteller", "vendor"];
    url.query_pairs()
        .find(|(key, value)| KEYS.contains(&key.to_lowercase().as_str()) && !value.trim().is_empty())
        .map(|(_, value)| value.trim().to_string())
}

/// Product containers on a listing page, outermost matches only.
fn product_cards<'a>(document: &'a Html, profile: &MarkupProfile) -> Vec<ElementRef<'a>> {
    for raw in &profile.product_container {
        let Some(selector) = parse_selector(raw) else {
            continue;
        };
        let matches: Vec<ElementRef<'a>> = document.select(&selector).collect();
        if matches.is_empty() {
            continue;
        }
        let ids: Vec<_> = matches.iter().map(|el| el.id()).collect();
        return matches
            .into_iter()
            .filter(|el| !el.ancestors().any(|ancestor| ids.contains(&ancestor.id())))
            .collect();
    }
    Vec::new()
}

pub(crate) fn parse_selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(selector) => Some(selector),
        Err(err) => {
            debug!(selector = raw, "skipping invalid selector: {:?}", err);
            None
        }
    }
}

/// Trimmed text of an element with inner whitespace collapsed.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `content` attribute when present (meta/microdata), otherwise the text.
pub(crate) fn element_value(el: ElementRef<'_>) -> Option<String> {
    let value = el
        .value()
        .attr("content")
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| element_text(el));
    (!value.is_empty()).then_some(value)
}
