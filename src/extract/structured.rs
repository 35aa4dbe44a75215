//! schema.org JSON-LD: the highest-priority strategy.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Selector};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::selectors::absolute_image;
use super::{ExtractCtx, FieldSet};
use crate::models::{Details, canonical_url};
use crate::price;

static LD_JSON: Lazy<Option<Selector>> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).ok());

static DOT_DECIMAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+(?:\.\d{1,2})?\s*$").expect("static regex"));

/// One `Product` node with the extra fields the enrichment pass reads.
#[derive(Debug, Clone, Default)]
pub struct StructuredProduct {
    pub fields: FieldSet,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub properties: Vec<(String, String)>,
}

/// Strategy: first `Product` found in the scope's JSON-LD blocks.
pub fn structured_data(scope: ElementRef<'_>, ctx: &ExtractCtx<'_>) -> FieldSet {
    structured_products(scope, ctx.base)
        .into_iter()
        .next()
        .map(|product| product.fields)
        .unwrap_or_default()
}

/// Every `Product` node in the scope, including those nested in an `ItemList`
/// or an `@graph`. Blocks that fail to parse are skipped.
pub fn structured_products(scope: ElementRef<'_>, base: &Url) -> Vec<StructuredProduct> {
    let Some(selector) = LD_JSON.as_ref() else {
        return Vec::new();
    };

    let mut products = Vec::new();
    for script in scope.select(selector) {
        let raw = script.text().collect::<String>();
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => collect_products(&value, base, &mut products),
            Err(err) => debug!(page = %base, "skipping malformed JSON-LD block: {err}"),
        }
    }
    products
}

pub(super) fn structured_details(scope: ElementRef<'_>, base: &Url) -> Details {
    let mut details = Details::default();
    if let Some(product) = structured_products(scope, base).into_iter().next() {
        details.description = product.description;
        details.tags = product.keywords;
        for (key, value) in product.properties {
            details.attrs.entry(key).or_insert(value);
        }
    }
    details
}

fn collect_products(value: &Value, base: &Url, out: &mut Vec<StructuredProduct>) {
    match value {
        Value::Array(nodes) => {
            for node in nodes {
                collect_products(node, base, out);
            }
        }
        Value::Object(node) => {
            if let Some(graph) = node.get("@graph") {
                collect_products(graph, base, out);
            }
            if has_type(node, "Product") {
                out.push(parse_product(node, base));
            } else if has_type(node, "ItemList") || has_type(node, "ListItem") {
                if let Some(elements) = node.get("itemListElement") {
                    collect_products(elements, base, out);
                }
                if let Some(item) = node.get("item") {
                    collect_products(item, base, out);
                }
            }
        }
        _ => {}
    }
}

fn has_type(node: &Map<String, Value>, wanted: &str) -> bool {
    let matches = |t: &str| t.rsplit(['/', ':']).next() == Some(wanted);
    match node.get("@type") {
        Some(Value::String(t)) => matches(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(matches),
        _ => false,
    }
}

fn parse_product(node: &Map<String, Value>, base: &Url) -> StructuredProduct {
    let fields = FieldSet {
        title: string_field(node.get("name")),
        price: node.get("offers").and_then(offer_price),
        image: node.get("image").and_then(|image| image_url(image, base)),
        brand: node.get("brand").and_then(brand_name),
        url: product_url(node, base),
        sku: node.get("sku").and_then(scalar_string),
    };

    StructuredProduct {
        fields,
        description: string_field(node.get("description")),
        keywords: node.get("keywords").map(keywords).unwrap_or_default(),
        properties: node
            .get("additionalProperty")
            .map(properties)
            .unwrap_or_default(),
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `offers` may be one Offer, an array, or an AggregateOffer.
fn offer_price(offers: &Value) -> Option<i64> {
    match offers {
        Value::Array(list) => list.iter().find_map(offer_price),
        Value::Object(offer) => ["price", "lowPrice", "highPrice"]
            .iter()
            .find_map(|key| offer.get(*key).and_then(json_price))
            .or_else(|| {
                offer
                    .get("priceSpecification")
                    .and_then(|spec| spec.get("price"))
                    .and_then(json_price)
            }),
        _ => None,
    }
}

fn json_price(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(price::from_major_units),
        Value::String(s) if DOT_DECIMAL.is_match(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(price::from_major_units),
        Value::String(s) => price::normalize(s),
        _ => None,
    }
}

fn image_url(value: &Value, base: &Url) -> Option<String> {
    match value {
        Value::String(raw) => absolute_image(raw, base),
        Value::Array(list) => list.iter().find_map(|v| image_url(v, base)),
        Value::Object(obj) => ["url", "contentUrl"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(|v| image_url(v, base))),
        _ => None,
    }
}

fn brand_name(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => string_field(Some(value)),
        Value::Object(obj) => string_field(obj.get("name")),
        Value::Array(list) => list.iter().find_map(brand_name),
        _ => None,
    }
}

fn product_url(node: &Map<String, Value>, base: &Url) -> Option<String> {
    let offer_url = node.get("offers").and_then(|offers| match offers {
        Value::Array(list) => list.iter().find_map(|o| o.get("url")),
        other => other.get("url"),
    });
    [node.get("url"), node.get("@id"), offer_url]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|raw| !raw.starts_with('#') && !raw.trim().is_empty())
        .find_map(|raw| base.join(raw.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|url| canonical_url(&url).to_string())
}

fn keywords(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        Value::Array(list) => list.iter().filter_map(scalar_string).collect(),
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for keyword in raw {
        let keyword = keyword.trim();
        if !keyword.is_empty() && !out.iter().any(|k| k == keyword) {
            out.push(keyword.to_string());
        }
    }
    out
}

fn properties(value: &Value) -> Vec<(String, String)> {
    let Value::Array(list) = value else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|prop| {
            let name = string_field(prop.get("name"))?;
            let value = prop.get("value").and_then(scalar_string)?;
            Some((name, value))
        })
        .collect()
}
