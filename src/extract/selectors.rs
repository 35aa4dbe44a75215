//! Markup strategies: scoped selectors, generic heuristics and the regex fallback.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Node};
use url::Url;

use super::{ExtractCtx, FieldSet, element_text, element_value, parse_selector};
use crate::models::{Details, canonical_url};
use crate::price;

const DETAIL_TITLE: &[&str] = &[
    r#"h1[itemprop="name"]"#,
    "h1",
    r#"meta[property="og:title"]"#,
];

const DETAIL_IMAGE: &[&str] = &[
    r#"meta[property="og:image"]"#,
    r#"[itemprop="image"]"#,
];

// Image attributes in priority order; lazy-loading attributes first.
const IMAGE_ATTRS: &[&str] = &[
    "data-src",
    "data-lazy",
    "data-lazy-src",
    "srcset",
    "data-srcset",
    "src",
    "content",
    "href",
];

const REJECTED_IMAGES: &[&str] = &[
    "favicon",
    "sprite",
    "placeholder",
    "spacer",
    "blank.gif",
    "loader",
    "/logo",
];

static LEADING_CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:€|£|\$|\bchf\b|\beur\b|\busd\b|\bpreis\b|\bprice\b)\s*:?\s*(\d[\d.,]*\d|\d)")
        .expect("static regex")
});

static TRAILING_CURRENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d[\d.,]*\d|\d)\s*(?:€|\beur\b)").expect("static regex"));

/// Strategy: ordered CSS selectors for known markup patterns.
pub fn scoped_selectors(scope: ElementRef<'_>, ctx: &ExtractCtx<'_>) -> FieldSet {
    let profile = ctx.profile;

    let mut title_list: Vec<&str> = Vec::new();
    let mut image_list: Vec<&str> = Vec::new();
    if ctx.detail {
        title_list.extend(DETAIL_TITLE);
        image_list.extend(DETAIL_IMAGE);
    }
    title_list.extend(profile.title.iter().map(String::as_str));
    image_list.extend(profile.image.iter().map(String::as_str));

    FieldSet {
        title: first_match(scope, &title_list, element_value),
        price: first_match(scope, &as_strs(&profile.price), price_value),
        image: first_match(scope, &image_list, |el| image_candidate(el, ctx.base)),
        brand: first_match(scope, &as_strs(&profile.brand), element_value),
        url: if ctx.detail {
            None
        } else {
            first_match(scope, &as_strs(&profile.link), |el| link_url(el, ctx.base))
        },
        sku: None,
    }
}

/// Strategy: broad scans that don't depend on known class names.
///
/// For the price, every element whose class or id mentions "price" is read and
/// the smallest positive value wins. Bundle totals tend to be larger than the
/// unit price.
pub fn generic_heuristics(scope: ElementRef<'_>, ctx: &ExtractCtx<'_>) -> FieldSet {
    let price = scope
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| mentions(el, "price"))
        .filter_map(price_value)
        .filter(|cents| *cents > 0)
        .min();

    let title = if ctx.detail {
        first_match(scope, &["title"], |el| {
            let text = element_text(el);
            let head = title_head(&text);
            (!head.is_empty()).then(|| head.to_string())
        })
    } else {
        first_match(scope, &["a"], |el| {
            let text = element_text(el);
            (!text.is_empty()).then_some(text)
        })
        .or_else(|| {
            first_match(scope, &["img[alt]"], |el| {
                el.value()
                    .attr("alt")
                    .map(str::trim)
                    .filter(|alt| !alt.is_empty())
                    .map(ToString::to_string)
            })
        })
    };

    let brand = scope
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| mentions(el, "brand") || mentions(el, "manufacturer"))
        .find_map(element_value);

    FieldSet {
        title,
        price,
        image: first_match(scope, &["img", "source"], |el| image_candidate(el, ctx.base)),
        brand,
        url: if ctx.detail {
            None
        } else {
            first_match(scope, &["a[href]"], |el| link_url(el, ctx.base))
        },
        sku: None,
    }
}

/// Strategy: currency symbol or keyword followed by a number, over visible text.
pub fn regex_fallback(scope: ElementRef<'_>, _ctx: &ExtractCtx<'_>) -> FieldSet {
    let text = visible_text(scope);
    let price = [&*LEADING_CURRENCY, &*TRAILING_CURRENCY]
        .iter()
        .flat_map(|re| re.captures_iter(&text))
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| price::normalize(m.as_str()))
        .find(|cents| *cents > 0);

    FieldSet {
        price,
        ..FieldSet::default()
    }
}

/// First usable image URL on an element, in lazy-load-aware attribute order.
pub fn image_candidate(el: ElementRef<'_>, base: &Url) -> Option<String> {
    IMAGE_ATTRS.iter().find_map(|attr| {
        let raw = el.value().attr(attr)?;
        let raw = if attr.ends_with("srcset") {
            raw.split(',').next()?.split_whitespace().next()?
        } else {
            raw
        };
        absolute_image(raw, base)
    })
}

/// Resolves an image reference, rejecting obvious non-product assets.
pub(crate) fn absolute_image(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let lower = raw.to_lowercase();
    if REJECTED_IMAGES.iter().any(|bad| lower.contains(bad)) {
        return None;
    }
    let raw = raw.replace("{width}", "800");
    let url = base.join(&raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Description, tags and attribute tables from plain markup.
pub(super) fn markup_details(scope: ElementRef<'_>, details: &mut Details) {
    if details.description.is_none() {
        details.description = first_match(
            scope,
            &[r#"[itemprop="description"]"#, r#"meta[name="description"]"#],
            element_value,
        );
    }

    for tag in select_all(scope, ".tags a, .product-tags a, a[rel=\"tag\"]") {
        let text = element_text(tag);
        if !text.is_empty() && !details.tags.contains(&text) {
            details.tags.push(text);
        }
    }

    for row in select_all(scope, "table tr") {
        let cells: Vec<ElementRef<'_>> = row
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| matches!(c.value().name(), "th" | "td"))
            .collect();
        if let [key, value, ..] = cells.as_slice() {
            insert_attr(details, element_text(*key), element_text(*value));
        }
    }

    for term in select_all(scope, "dl dt") {
        let value = term
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .filter(|el| el.value().name() == "dd");
        if let Some(value) = value {
            insert_attr(details, element_text(term), element_text(value));
        }
    }
}

fn insert_attr(details: &mut Details, key: String, value: String) {
    let key = key.trim().trim_end_matches(':').trim().to_string();
    if key.is_empty() || value.is_empty() {
        return;
    }
    details.attrs.entry(key).or_insert(value);
}

fn select_all<'a>(scope: ElementRef<'a>, raw: &str) -> Vec<ElementRef<'a>> {
    parse_selector(raw)
        .map(|selector| scope.select(&selector).collect())
        .unwrap_or_default()
}

/// Runs each selector in order and returns the first element value `read` accepts.
fn first_match<T>(
    scope: ElementRef<'_>,
    selectors: &[&str],
    read: impl Fn(ElementRef<'_>) -> Option<T>,
) -> Option<T> {
    selectors.iter().find_map(|raw| {
        let selector = parse_selector(raw)?;
        scope.select(&selector).find_map(&read)
    })
}

/// Page titles usually read "Product | Shop"; keep the product part.
fn title_head(text: &str) -> &str {
    [" | ", " – ", " - "]
        .iter()
        .filter_map(|sep| text.find(sep))
        .min()
        .map_or(text, |idx| &text[..idx])
        .trim()
}

fn as_strs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

fn price_value(el: ElementRef<'_>) -> Option<i64> {
    let attr = |name: &str| {
        el.value()
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(raw) = attr("content").or_else(|| attr("data-price")) {
        // Machine-readable attributes use a dot decimal separator.
        if let Ok(value) = raw.parse::<f64>() {
            return price::from_major_units(value);
        }
        return price::normalize(raw);
    }
    price::normalize(&element_text(el))
}

fn link_url(el: ElementRef<'_>, base: &Url) -> Option<String> {
    let href = el.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:") {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| canonical_url(&url).to_string())
}

fn mentions(el: &ElementRef<'_>, needle: &str) -> bool {
    ["class", "id"].iter().any(|attr| {
        el.value()
            .attr(attr)
            .is_some_and(|v| v.to_lowercase().contains(needle))
    })
}

/// Text of the scope without `script`, `style` and `noscript` contents.
fn visible_text(scope: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in scope.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|p| matches!(p.value().name(), "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;
    use crate::traits::MarkupProfile;

    fn with_ctx<T>(detail: bool, f: impl FnOnce(&ExtractCtx<'_>) -> T) -> T {
        let base = Url::parse("https://shop.example/c/boots").unwrap();
        let profile = MarkupProfile::default();
        let ctx = ExtractCtx {
            base: &base,
            profile: &profile,
            detail,
        };
        f(&ctx)
    }

    #[test]
    fn itemprop_content_beats_text() {
        let doc = Html::parse_document(
            r#"<div><span itemprop="price" content="79.90">79,90 € statt 99,00 €</span></div>"#,
        );
        let fields = with_ctx(false, |ctx| scoped_selectors(doc.root_element(), ctx));
        assert_eq!(fields.price, Some(7990));
    }

    #[test]
    fn heuristics_pick_the_lowest_price() {
        let doc = Html::parse_document(
            r#"<div>
  <span class="Set-Price">249,00 €</span>
  <span id="unit-price">89,00 €</span>
  <span class="old-price">0,00</span>
</div>"#,
        );
        let fields = with_ctx(false, |ctx| generic_heuristics(doc.root_element(), ctx));
        assert_eq!(fields.price, Some(8900));
    }

    #[test]
    fn regex_ignores_script_text() {
        let doc = Html::parse_document(
            r#"<html><head><script>var price = 5;</script></head><body>Now only 19,95 €</body></html>"#,
        );
        let fields = with_ctx(true, |ctx| regex_fallback(doc.root_element(), ctx));
        assert_eq!(fields.price, Some(1995));
    }

    #[test]
    fn images_prefer_lazy_attributes_and_skip_favicons() {
        let base = Url::parse("https://shop.example/c/boots").unwrap();
        let doc = Html::parse_document(
            r#"<img id="a" src="/favicon.ico"><img id="b" srcset="/img/b-400.jpg 400w, /img/b-800.jpg 800w" src="/img/b.jpg">"#,
        );
        let sel = scraper::Selector::parse("img").unwrap();
        let found: Vec<_> = doc
            .select(&sel)
            .filter_map(|el| image_candidate(el, &base))
            .collect();
        assert_eq!(found, vec!["https://shop.example/img/b-400.jpg"]);
    }

    #[test]
    fn image_width_placeholder_is_filled() {
        let base = Url::parse("https://shop.example/").unwrap();
        assert_eq!(
            absolute_image("//cdn.example/p_{width}x.jpg", &base).as_deref(),
            Some("https://cdn.example/p_800x.jpg")
        );
        assert_eq!(absolute_image("data:image/gif;base64,AAAA", &base), None);
    }

    #[test]
    fn detail_title_prefers_h1_and_skips_links() {
        let doc = Html::parse_document(
            r#"<html><head><title>Boot | Shop</title></head><body>
<a href="/">Home</a><h2>Related</h2><h1> Trail   Boot </h1></body></html>"#,
        );
        let fields = with_ctx(true, |ctx| scoped_selectors(doc.root_element(), ctx));
        assert_eq!(fields.title.as_deref(), Some("Trail Boot"));
        assert_eq!(fields.url, None);
    }

    #[test]
    fn markup_details_read_tables_lists_and_tags() {
        let doc = Html::parse_document(
            r#"<div>
<meta name="description" content="A sturdy boot.">
<table><tr><th>Material:</th><td>Leather</td></tr><tr><td>Sole</td><td>Rubber</td></tr></table>
<dl><dt>Colour</dt><dd>Brown</dd></dl>
<div class="tags"><a>outdoor</a><a>leather</a><a>outdoor</a></div>
</div>"#,
        );
        let mut details = Details::default();
        markup_details(doc.root_element(), &mut details);
        assert_eq!(details.description.as_deref(), Some("A sturdy boot."));
        assert_eq!(details.attrs.get("Material").map(String::as_str), Some("Leather"));
        assert_eq!(details.attrs.get("Sole").map(String::as_str), Some("Rubber"));
        assert_eq!(details.attrs.get("Colour").map(String::as_str), Some("Brown"));
        assert_eq!(details.tags, vec!["outdoor", "leather"]);
    }
}
