//! Newsletter HTML cleaning.
//!
//! Structural cleaning runs on a `kuchiki` DOM: boilerplate elements are
//! detached, links are rendered as `[text](url)`, and the remaining text
//! nodes are joined line by line. When that leaves nothing, callers fall
//! back to [`strip_tags`] and then to the plain-text body.

use kuchiki::traits::*;
use kuchiki::NodeRef;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated for length...]";

const BOILERPLATE_SELECTOR: &str = "head, title, script, style, meta, link, noscript, \
     header, footer, nav, [role=banner], [role=navigation], [role=contentinfo]";

const MARKER_WORDS: [&str; 5] = ["footer", "unsubscribe", "social", "share", "preference"];

const UNSUBSCRIBE_PHRASES: [&str; 9] = [
    "unsubscribe",
    "manage preferences",
    "update your preferences",
    "why did i get this",
    "sent to",
    "you received this email",
    "no longer want to receive",
    "email settings",
    "stop receiving",
];

/// Blocks at least this long are content even if they mention a phrase
const SHORT_BLOCK_CHARS: usize = 100;

static SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)\s*>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static INLINE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(?:x([0-9a-fA-F]+)|([0-9]+));").unwrap());

/// Structurally clean newsletter HTML into readable text.
///
/// Returns `None` when nothing readable survives cleaning.
pub fn clean_newsletter_html(html: &str) -> Option<String> {
    let document = kuchiki::parse_html().one(html);

    remove_by_selector(&document, BOILERPLATE_SELECTOR);
    remove_marked_elements(&document);
    remove_unsubscribe_blocks(&document);
    render_links(&document);

    let root = document
        .select_first("body")
        .map(|body| body.as_node().clone())
        .unwrap_or(document);

    let text = extract_text(&root);
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn remove_by_selector(document: &NodeRef, selector: &str) {
    match document.select(selector) {
        Ok(nodes) => {
            let nodes: Vec<_> = nodes.collect();
            for node in nodes {
                node.as_node().detach();
            }
        }
        Err(()) => warn!("Invalid cleaning selector: {}", selector),
    }
}

fn remove_marked_elements(document: &NodeRef) {
    let nodes: Vec<NodeRef> = document.descendants().collect();
    for node in nodes {
        let Some(element) = node.as_element() else {
            continue;
        };
        if matches!(element.name.local.as_ref(), "html" | "body") {
            continue;
        }
        if has_boilerplate_marker(element) {
            node.detach();
        }
    }
}

fn has_boilerplate_marker(element: &kuchiki::ElementData) -> bool {
    let attrs = element.attributes.borrow();
    ["class", "id"].iter().any(|key| {
        attrs
            .get(*key)
            .map(|value| {
                let lower = value.to_ascii_lowercase();
                MARKER_WORDS.iter().any(|marker| lower.contains(marker))
            })
            .unwrap_or(false)
    })
}

/// Detach the parent of any short text mentioning an unsubscribe phrase
fn remove_unsubscribe_blocks(document: &NodeRef) {
    let nodes: Vec<NodeRef> = document.descendants().collect();
    for node in nodes {
        let Some(text) = node.as_text() else {
            continue;
        };
        let text = text.borrow();
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.chars().count() >= SHORT_BLOCK_CHARS {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if !UNSUBSCRIBE_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
            continue;
        }

        let Some(parent) = node.parent() else {
            continue;
        };
        let is_root = parent
            .as_element()
            .map(|e| matches!(e.name.local.as_ref(), "html" | "body"))
            .unwrap_or(true);
        if is_root {
            node.detach();
        } else {
            parent.detach();
        }
    }
}

fn render_links(document: &NodeRef) {
    let Ok(anchors) = document.select("a[href]") else {
        return;
    };
    let anchors: Vec<_> = anchors.collect();
    for anchor in anchors {
        let href = anchor
            .attributes
            .borrow()
            .get("href")
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let node = anchor.as_node();
        let label = INLINE_SPACE
            .replace_all(node.text_contents().trim(), " ")
            .into_owned();
        if label.is_empty() {
            continue;
        }
        node.insert_before(NodeRef::new_text(format!("[{}]({})", label, href)));
        node.detach();
    }
}

fn is_heading(node: &NodeRef) -> bool {
    node.ancestors().any(|ancestor| {
        ancestor
            .as_element()
            .map(|e| matches!(e.name.local.as_ref(), "h1" | "h2" | "h3" | "h4" | "h5" | "h6"))
            .unwrap_or(false)
    })
}

/// One line per non-blank text node; headings get a blank line before them
fn extract_text(root: &NodeRef) -> String {
    let mut lines: Vec<String> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.as_text() else {
            continue;
        };
        let text = text.borrow();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_heading(&node) && !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(trimmed.to_string());
    }
    lines.join("\n")
}

/// Crude fallback: drop script/style/head blocks and every tag
pub fn strip_tags(html: &str) -> String {
    let without_blocks = SCRIPT_STYLE.replace_all(html, "\n");
    let without_tags = TAG.replace_all(&without_blocks, "\n");
    decode_html_entities(&without_tags)
}

/// Trim every line, collapse runs of spaces, and collapse runs of blank
/// lines into a single blank line.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut previous_blank = true;
    for line in text.lines() {
        let line = INLINE_SPACE.replace_all(line.trim(), " ").into_owned();
        if line.is_empty() {
            if !previous_blank {
                out.push(line);
            }
            previous_blank = true;
        } else {
            out.push(line);
            previous_blank = false;
        }
    }
    while out.last().map(|l| l.is_empty()).unwrap_or(false) {
        out.pop();
    }
    out.join("\n")
}

/// Cut `text` to at most `max_chars` characters, appending a marker when cut
pub fn truncate_content(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{}", &text[..byte_index], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Produce cleaned newsletter text, preferring HTML over plain text.
///
/// Returns `None` only when neither body yields any text.
pub fn clean_content(
    html: Option<&str>,
    plain: Option<&str>,
    max_chars: usize,
) -> Option<String> {
    let from_html = html.filter(|h| !h.trim().is_empty()).and_then(|h| {
        clean_newsletter_html(h).or_else(|| {
            debug!("Structural HTML cleaning produced no text, stripping tags instead");
            let stripped = normalize_whitespace(&strip_tags(h));
            if stripped.is_empty() {
                None
            } else {
                Some(stripped)
            }
        })
    });

    let text = from_html.or_else(|| plain.map(str::to_string))?;
    let normalized = normalize_whitespace(&text);
    if normalized.is_empty() {
        return None;
    }
    Some(truncate_content(&normalized, max_chars))
}

/// Decode the handful of entities Gmail puts in snippets, plus numeric ones
pub fn decode_html_entities(s: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(s, |caps: &regex::Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    // &amp; last so "&amp;lt;" decodes to "&lt;" and not "<"
    numeric
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEWSLETTER: &str = r##"
<html>
  <head><title>Daily AI</title><style>.x { color: red; }</style></head>
  <body>
    <header><a href="https://example.com">View in browser</a></header>
    <nav>Home | Archive</nav>
    <h1>Today in AI</h1>
    <p>Models got <b>faster</b> again.</p>
    <p>Read the <a href="https://example.com/post">full story</a> here.</p>
    <p><a href="#top">Back to top</a></p>
    <h2>Tools</h2>
    <p>A new editor shipped.</p>
    <div class="social-links">Twitter LinkedIn</div>
    <p>You received this email because you signed up. <a href="https://x.io/u">Unsubscribe</a></p>
    <footer>123 Main Street</footer>
    <script>track();</script>
  </body>
</html>"##;

    #[test]
    fn test_clean_newsletter_html_strips_boilerplate() {
        let text = clean_newsletter_html(NEWSLETTER).unwrap();

        assert!(text.contains("Today in AI"));
        assert!(text.contains("faster"));
        assert!(text.contains("[full story](https://example.com/post)"));
        assert!(text.contains("A new editor shipped."));

        assert!(!text.contains("View in browser"));
        assert!(!text.contains("Archive"));
        assert!(!text.contains("Twitter"));
        assert!(!text.contains("Unsubscribe"));
        assert!(!text.contains("123 Main Street"));
        assert!(!text.contains("track()"));
        assert!(!text.contains("color: red"));
        // In-page anchors keep their text without a link
        assert!(text.contains("Back to top"));
        assert!(!text.contains("(#top)"));
    }

    #[test]
    fn test_headings_get_blank_line() {
        let text = clean_newsletter_html(NEWSLETTER).unwrap();
        assert!(text.contains("\n\nTools"));
    }

    #[test]
    fn test_long_block_mentioning_phrase_is_kept() {
        let long = format!(
            "<p>{} and if you no longer want to receive updates, reply.</p>",
            "Detailed analysis of the week ".repeat(5)
        );
        let text = clean_newsletter_html(&long).unwrap();
        assert!(text.contains("Detailed analysis"));
    }

    #[test]
    fn test_all_boilerplate_yields_none() {
        let html = r#"<html><body><div class="footer">Unsubscribe</div></body></html>"#;
        assert!(clean_newsletter_html(html).is_none());
    }

    #[test]
    fn test_clean_content_falls_back_to_plain() {
        let html = r#"<div class="footer-wrapper"><p>All content inside a footer-ish wrapper</p></div>"#;
        let cleaned = clean_content(Some(html), Some("Plain  text   body"), 1000);
        // Tag stripping still recovers the text before the plain body is used
        assert_eq!(cleaned.as_deref(), Some("All content inside a footer-ish wrapper"));

        let cleaned = clean_content(Some("<br/>"), Some("Plain  text   body"), 1000);
        assert_eq!(cleaned.as_deref(), Some("Plain text body"));

        assert_eq!(clean_content(None, None, 1000), None);
    }

    #[test]
    fn test_normalize_whitespace() {
        let text = "  Hello   world \n\n\n\n  Second\tline  \n\n";
        assert_eq!(normalize_whitespace(text), "Hello world\n\nSecond line");
    }

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 10), "short");
        let truncated = truncate_content("ééééé", 3);
        assert_eq!(truncated, format!("ééé{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_strip_tags() {
        let text = strip_tags("<style>p{}</style><p>Tom &amp; Jerry</p>");
        assert_eq!(normalize_whitespace(&text), "Tom & Jerry");
    }

    #[test]
    fn test_decode_html_entities() {
        assert_eq!(decode_html_entities("It&#39;s &quot;fine&quot;"), "It's \"fine\"");
        assert_eq!(decode_html_entities("&#x2014; &lt;b&gt;"), "\u{2014} <b>");
        assert_eq!(decode_html_entities("&amp;lt;"), "&lt;");
    }
}
