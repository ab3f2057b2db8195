//! HTML content extraction: plain text, page metadata and link discovery.
//!
//! All functions are pure transformations of their input; nothing here
//! performs network I/O.

use crate::schema_org::find_event_node;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Extracted text is capped so one pathological page cannot balloon
/// downstream payloads.
const MAX_TEXT_BYTES: usize = 50 * 1024;
const TRUNCATION_MARKER: &str = "\n[truncated]";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub og_image: Option<String>,
    /// Payload of the first JSON-LD block containing a schema.org Event.
    pub json_ld: Option<Value>,
}

static SCRIPT_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>",
    )
    .expect("static regex")
});
static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("static regex"));
static BLOCK_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</(p|div|h[1-6]|li|ul|ol|dl|dd|dt|table|tr|th|td|section|article|aside|header|footer|blockquote|pre|figure|figcaption|form|fieldset|address)\s*>|<(br|hr)\s*/?>",
    )
    .expect("static regex")
});
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"));
static DECIMAL_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(\d+);").expect("static regex"));
static HEX_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#[xX]([0-9a-fA-F]+);").expect("static regex"));
static HORIZONTAL_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\x0b\x0c]+").expect("static regex"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").expect("static regex"));
static NEWLINE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Fixed table of named entities worth decoding in scraped event pages.
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&nbsp;", " "),
    ("&ndash;", "\u{2013}"),
    ("&mdash;", "\u{2014}"),
    ("&lsquo;", "\u{2018}"),
    ("&rsquo;", "\u{2019}"),
    ("&ldquo;", "\u{201C}"),
    ("&rdquo;", "\u{201D}"),
    ("&hellip;", "\u{2026}"),
    ("&bull;", "\u{2022}"),
    ("&middot;", "\u{00B7}"),
    ("&copy;", "\u{00A9}"),
    ("&reg;", "\u{00AE}"),
    ("&trade;", "\u{2122}"),
    ("&deg;", "\u{00B0}"),
];

fn decode_entities(input: &str) -> String {
    let mut text = DECIMAL_REF
        .replace_all(input, |caps: &regex::Captures| {
            caps[1]
                .parse::<u32>()
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned();
    text = HEX_REF
        .replace_all(&text, |caps: &regex::Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned();
    for (entity, replacement) in NAMED_ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, replacement);
        }
    }
    text
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Converts raw HTML to readable plain text.
///
/// Strips script/style/noscript blocks and comments, turns block-level
/// closing tags and `<br>`/`<hr>` into newlines, drops the remaining
/// tags, decodes entities and collapses whitespace. Output is capped at
/// 50 KiB with a trailing truncation marker.
pub fn extract_text(html: &str) -> String {
    let text = SCRIPT_BLOCKS.replace_all(html, "");
    let text = COMMENTS.replace_all(&text, "");
    let text = BLOCK_BREAKS.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = HORIZONTAL_WS.replace_all(&text, " ");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    let text = NEWLINE_RUNS.replace_all(&text, "\n\n");
    let text = text.trim();

    if text.len() > MAX_TEXT_BYTES {
        let mut truncated = truncate_at_char_boundary(text, MAX_TEXT_BYTES).to_string();
        truncated.push_str(TRUNCATION_MARKER);
        truncated
    } else {
        text.to_string()
    }
}

/// Pulls the page title, the Open Graph image and the first JSON-LD
/// block carrying a schema.org Event.
pub fn extract_metadata(html: &str) -> PageMetadata {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").expect("static selector");
    let meta_selector = Selector::parse("meta").expect("static selector");
    let json_ld_selector =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("static selector");

    let mut title = document
        .select(&title_selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut og_image = None;
    for meta in document.select(&meta_selector) {
        // The DOM lookup is indifferent to attribute order and quoting.
        let property = meta
            .value()
            .attr("property")
            .or_else(|| meta.value().attr("name"));
        let content = meta.value().attr("content");
        match (property, content) {
            (Some("og:image"), Some(content)) if og_image.is_none() => {
                og_image = Some(content.to_string());
            }
            (Some("og:title"), Some(content)) if title.is_none() => {
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    title = Some(trimmed.to_string());
                }
            }
            _ => {}
        }
    }

    // First JSON-LD block with an Event node wins; malformed blocks are
    // skipped silently.
    let mut json_ld = None;
    for script in document.select(&json_ld_selector) {
        let raw: String = script.text().collect();
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) if find_event_node(&value).is_some() => {
                json_ld = Some(value);
                break;
            }
            _ => continue,
        }
    }

    PageMetadata {
        title,
        og_image,
        json_ld,
    }
}

/// Collects every `<a href>` resolved against `base_url`, discarding
/// unparsable URLs. The result is deduplicated; ordering is not
/// guaranteed.
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let base = match Url::parse(base_url) {
        Ok(base) => base,
        Err(_) => return Vec::new(),
    };

    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[href]").expect("static selector");

    let mut seen = HashSet::new();
    for anchor in document.select(&anchor_selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Ok(resolved) = base.join(href.trim()) {
            if matches!(resolved.scheme(), "http" | "https") {
                seen.insert(resolved.to_string());
            }
        }
    }
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_extraction_strips_tags_and_decodes_entities() {
        let text = extract_text("<p>Tom &amp; Jerry&apos;s <strong>Show</strong></p>");
        assert!(text.contains("Tom & Jerry's Show"));
        assert!(!text.contains('<'));
        assert!(!text.contains("&amp;"));
    }

    #[test]
    fn text_extraction_drops_scripts_and_comments() {
        let html = r#"
            <html><head><style>.x { color: red }</style>
            <script>var hidden = "secret";</script></head>
            <body><!-- nav goes here --><div>Gate opens at 9am</div>
            <noscript>enable javascript</noscript></body></html>
        "#;
        let text = extract_text(html);
        assert!(text.contains("Gate opens at 9am"));
        assert!(!text.contains("secret"));
        assert!(!text.contains("color"));
        assert!(!text.contains("nav goes here"));
        assert!(!text.contains("enable javascript"));
    }

    #[test]
    fn block_tags_become_newlines() {
        let text = extract_text("<h1>Fair</h1><p>Day one</p><p>Day two</p>Line<br>Break");
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&"Fair"));
        assert!(lines.contains(&"Day one"));
        assert!(lines.contains(&"Break"));
    }

    #[test]
    fn numeric_character_references_decode() {
        let text = extract_text("<p>&#72;i &#x21; caf&#233;</p>");
        assert!(text.contains("Hi !"));
        assert!(text.contains("café"));
    }

    #[test]
    fn long_documents_truncate_with_marker() {
        let html = format!("<p>{}</p>", "event ".repeat(20_000));
        let text = extract_text(&html);
        assert!(text.len() <= MAX_TEXT_BYTES + TRUNCATION_MARKER.len());
        assert!(text.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn title_falls_back_to_og_title() {
        let html = r#"<head><meta property="og:title" content="Harvest Festival"></head>"#;
        assert_eq!(
            extract_metadata(html).title.as_deref(),
            Some("Harvest Festival")
        );

        let html = "<head><title>Main Title</title><meta property=\"og:title\" content=\"Other\"></head>";
        assert_eq!(extract_metadata(html).title.as_deref(), Some("Main Title"));
    }

    #[test]
    fn og_image_matches_either_attribute_order_and_quote_style() {
        let forward = r#"<meta property="og:image" content="https://cdn.example.com/a.jpg">"#;
        let reversed = r#"<meta content='https://cdn.example.com/a.jpg' property='og:image'>"#;
        for html in [forward, reversed] {
            assert_eq!(
                extract_metadata(html).og_image.as_deref(),
                Some("https://cdn.example.com/a.jpg")
            );
        }
    }

    #[test]
    fn json_ld_takes_first_event_block_and_skips_malformed() {
        let html = r#"
            <script type="application/ld+json">{not json</script>
            <script type="application/ld+json">{"@type": "BreadcrumbList"}</script>
            <script type="application/ld+json">
              {"@graph": [{"@type": "Event", "name": "Spring Carnival"}]}
            </script>
        "#;
        let meta = extract_metadata(html);
        let block = meta.json_ld.expect("event block");
        assert_eq!(block["@graph"][0]["name"], "Spring Carnival");
    }

    #[test]
    fn links_resolve_against_base_and_dedupe() {
        let html = r#"
            <a href="/events/fair">Fair</a>
            <a href="/events/fair">Fair again</a>
            <a href="https://other.example.com/e/1">Offsite</a>
            <a href="//cdn.example.com/asset">Protocol relative</a>
            <a href="mailto:info@example.com">Mail</a>
            <a href="javascript:void(0)">Nope</a>
        "#;
        let mut links = extract_links(html, "https://fairs.example.com/list");
        links.sort();
        assert!(links.contains(&"https://fairs.example.com/events/fair".to_string()));
        assert!(links.contains(&"https://other.example.com/e/1".to_string()));
        assert!(links.contains(&"https://cdn.example.com/asset".to_string()));
        assert_eq!(links.len(), 3);
    }
}
