//! Extraction surfaces. Each function pulls raw, unvalidated candidates out of
//! one part of a page; none of them normalize.

use crate::normalize::find_candidates;
use crate::obfuscation::{decode_cf_email, decode_protected_href};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value;

static MAILTO_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href^='mailto:']").unwrap());
static CF_EMAIL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-cfemail]").unwrap());
static PROTECTED_LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href*='/cdn-cgi/l/email-protection#']").unwrap());
static DATA_EMAIL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-email]").unwrap());
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

/// CSS selectors the rendered path queries in the live DOM.
pub(crate) const MAILTO_CSS: &str = "a[href^='mailto:']";
pub(crate) const DATA_EMAIL_CSS: &str = "[data-email]";

/// Regex matches anywhere in `text` (raw body, rendered markup, body text).
pub(crate) fn text_matches(text: &str) -> Vec<String> {
    find_candidates(text).map(str::to_string).collect()
}

/// `href` values of `mailto:` links, prefix included.
pub(crate) fn mailto_links(document: &Html) -> Vec<String> {
    document
        .select(&MAILTO_SELECTOR)
        .filter_map(|element| element.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Matches inside HTML comments, including those outside `<html>`.
pub(crate) fn comments(document: &Html) -> Vec<String> {
    document
        .tree
        .root()
        .descendants()
        .filter_map(|node| node.value().as_comment())
        .flat_map(|comment| text_matches(comment))
        .collect()
}

/// Matches inside individual text nodes of `<body>`.
pub(crate) fn text_nodes(document: &Html) -> Vec<String> {
    let Some(body) = document.select(&BODY_SELECTOR).next() else {
        return Vec::new();
    };
    body.text().flat_map(text_matches).collect()
}

/// Decoded Cloudflare-obfuscated addresses. A payload that fails to decode is
/// skipped without affecting the others.
pub(crate) fn obfuscated(document: &Html) -> Vec<String> {
    let spans = document
        .select(&CF_EMAIL_SELECTOR)
        .filter_map(|element| element.value().attr("data-cfemail"))
        .map(decode_cf_email);
    let links = document
        .select(&PROTECTED_LINK_SELECTOR)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(decode_protected_href);

    spans
        .chain(links)
        .filter_map(|decoded| match decoded {
            Ok(email) => Some(email),
            Err(e) => {
                tracing::debug!(target: "scrape_task", "Skipping obfuscated email: {}", e);
                None
            }
        })
        .collect()
}

/// Values of `data-email` attributes.
pub(crate) fn data_attributes(document: &Html) -> Vec<String> {
    document
        .select(&DATA_EMAIL_SELECTOR)
        .filter_map(|element| element.value().attr("data-email"))
        .map(str::to_string)
        .collect()
}

/// The document title, trimmed; empty when absent.
pub(crate) fn page_title(document: &Html) -> String {
    document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// Every markup-level surface over a raw body and its parse tree.
pub(crate) fn markup_candidates(raw: &str, document: &Html) -> Vec<String> {
    let mut candidates = text_matches(raw);
    candidates.extend(mailto_links(document));
    candidates.extend(comments(document));
    candidates.extend(text_nodes(document));
    candidates.extend(obfuscated(document));
    candidates.extend(data_attributes(document));
    candidates
}

/// Regex matches inside inline script bodies.
pub(crate) fn script_candidates(scripts: &[String]) -> Vec<String> {
    scripts.iter().flat_map(|script| text_matches(script)).collect()
}

/// String values containing `@` anywhere inside JSON-LD blocks. Blocks that
/// are not valid JSON are skipped.
pub(crate) fn json_ld_candidates(blocks: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for block in blocks {
        match serde_json::from_str::<Value>(block) {
            Ok(value) => walk_json(&value, &mut found),
            Err(e) => tracing::debug!(target: "scrape_task", "Skipping invalid JSON-LD block: {}", e),
        }
    }
    found
}

fn walk_json(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) if s.contains('@') => found.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|item| walk_json(item, found)),
        Value::Object(map) => map.values().for_each(|item| walk_json(item, found)),
        _ => {}
    }
}
