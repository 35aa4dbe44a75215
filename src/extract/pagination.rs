//! "Next page" and numbered pagination links.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use super::{element_text, parse_selector};

const NEXT_SELECTORS: &[&str] = &[
    r#"a[rel~="next"]"#,
    r#"link[rel~="next"]"#,
    ".pagination .next a",
    ".pagination-next a",
    "a.pagination-next",
    ".pages-item-next a",
    "li.next a",
    "a.next",
];

const PAGINATION_CONTAINERS: &[&str] = &[
    ".pagination",
    ".pages",
    ".page-numbers",
    ".pager",
    r#"nav[aria-label*="agination"]"#,
];

static NEXT_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:next|weiter|nächste)\b|^[›»]$").expect("static regex"));

/// The single "next page" link: `rel=next`, a pagination class, or link text.
pub fn next_page(document: &Html, base: &Url) -> Option<Url> {
    let by_selector = NEXT_SELECTORS.iter().find_map(|raw| {
        let selector = parse_selector(raw)?;
        document
            .select(&selector)
            .find_map(|el| resolve_href(el, base))
    });
    if by_selector.is_some() {
        return by_selector;
    }

    let anchors = parse_selector("a[href]")?;
    document
        .select(&anchors)
        .filter(|el| NEXT_TEXT.is_match(&element_text(*el)))
        .find_map(|el| resolve_href(el, base))
}

/// Numbered pagination links in discovery order, without duplicates.
pub fn numbered_pages(document: &Html, base: &Url) -> Vec<Url> {
    let mut anchors: Vec<ElementRef<'_>> = Vec::new();
    for raw in PAGINATION_CONTAINERS {
        let Some(container) = parse_selector(&format!("{raw} a[href]")) else {
            continue;
        };
        anchors.extend(document.select(&container));
    }
    if anchors.is_empty()
        && let Some(selector) = parse_selector("a[href]")
    {
        anchors.extend(document.select(&selector).filter(|el| {
            el.value()
                .attr("href")
                .is_some_and(|href| href.contains("page") || href.contains("p="))
        }));
    }

    let mut pages: Vec<Url> = Vec::new();
    for anchor in anchors {
        let text = element_text(anchor);
        if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Some(url) = resolve_href(anchor, base)
            && !pages.contains(&url)
        {
            pages.push(url);
        }
    }
    pages
}

fn resolve_href(el: ElementRef<'_>, base: &Url) -> Option<Url> {
    let href = el.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('#') || href.to_lowercase().starts_with("javascript:") {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    if !matches!(url.scheme(), "http" | "https") || url == *base {
        return None;
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://shop.example/c/boots?page=1").unwrap()
    }

    #[test]
    fn next_link_by_text() {
        let doc = Html::parse_document(
            r#"<div><a href="/c/boots?page=0">Zurück</a><a href="/c/boots?page=2"> Weiter » </a></div>"#,
        );
        assert_eq!(
            next_page(&doc, &base()).map(|u| u.to_string()),
            Some("https://shop.example/c/boots?page=2".to_string())
        );
    }

    #[test]
    fn rel_next_beats_text() {
        let doc = Html::parse_document(
            r#"<head><link rel="next" href="/c/boots?page=3"></head><body><a href="?page=2">next</a></body>"#,
        );
        assert_eq!(
            next_page(&doc, &base()).map(|u| u.to_string()),
            Some("https://shop.example/c/boots?page=3".to_string())
        );
    }

    #[test]
    fn no_next_link_on_the_last_page() {
        let doc = Html::parse_document(r##"<a href="#top">Next</a><a href="?page=1">1</a>"##);
        assert_eq!(next_page(&doc, &base()), None);
    }

    #[test]
    fn numbered_links_skip_the_current_page_and_duplicates() {
        let doc = Html::parse_document(
            r#"<ul class="pagination">
<li><a href="?page=1">1</a></li><li><a href="?page=2">2</a></li>
<li><a href="?page=3">3</a></li><li><a href="?page=2">2</a></li><li><a href="?page=2">›</a></li>
</ul>"#,
        );
        let pages: Vec<String> = numbered_pages(&doc, &base())
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            pages,
            vec![
                "https://shop.example/c/boots?page=2",
                "https://shop.example/c/boots?page=3"
            ]
        );
    }
}
