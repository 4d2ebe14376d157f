//! Parsed document plus the text, label and image helpers every strategy
//! shares.
//!
//! `scraper` trees are `!Send`; a [`Document`] must be dropped before the
//! pipeline awaits anything.

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::config::LabelConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::normalize::fold_width;
use crate::types::Field;

/// Elements whose text never describes a listing.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Elements that start a new line in [`block_text`].
pub(crate) const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "dl", "dt", "dd", "tr", "table", "tbody", "thead", "section",
    "article", "h1", "h2", "h3", "h4", "h5", "h6", "header", "footer", "blockquote", "pre",
];

/// Longest label key accepted in a `key: value` pair.
const MAX_LABEL_CHARS: usize = 12;

pub struct Document {
    html: Html,
    raw: String,
    source_url: Url,
    today: NaiveDate,
}

impl Document {
    /// Parse `raw` as an HTML document fetched from `source_url`.
    ///
    /// Parsing itself never fails; html5ever repairs whatever it is given.
    /// The source URL must be absolute http(s).
    pub fn parse(raw: &str, source_url: &str, today: NaiveDate) -> ExtractResult<Self> {
        let url = Url::parse(source_url).map_err(|e| ExtractError::InvalidSourceUrl {
            url: source_url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExtractError::InvalidSourceUrl {
                url: source_url.to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(Self {
            html: Html::parse_document(raw),
            raw: raw.to_string(),
            source_url: url,
            today,
        })
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// The document exactly as received, before html5ever repair.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Elements matching `selector` in document order. An unparsable
    /// selector matches nothing; configured selectors are validated on load.
    pub fn select(&self, selector: &str) -> Vec<ElementRef<'_>> {
        match Selector::parse(selector) {
            Ok(sel) => self.html.select(&sel).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// The `<body>` element, falling back to the root.
    pub fn body(&self) -> ElementRef<'_> {
        Selector::parse("body")
            .ok()
            .and_then(|sel| self.html.select(&sel).next())
            .unwrap_or_else(|| self.html.root_element())
    }

    /// Resolve `href` against the source URL, keeping http(s) results only.
    pub fn resolve_url(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
            return None;
        }
        let url = self.source_url.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }

    /// Up to `max` distinct absolute image URLs at or under `el`.
    pub fn images_within(&self, el: ElementRef<'_>, max: usize) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        let candidates = std::iter::once(el).chain(el.descendants().skip(1).filter_map(ElementRef::wrap));
        for img in candidates.filter(|e| e.value().name() == "img") {
            if images.len() >= max {
                break;
            }
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .or_else(|| img.value().attr("data-original"));
            if let Some(url) = src.and_then(|s| self.resolve_url(s)) {
                if !images.contains(&url) {
                    images.push(url);
                }
            }
        }
        images
    }
}

// ── Text helpers ────────────────────────────────────────────────────────────

/// Collapse runs of ASCII whitespace and no-break spaces to one space. The
/// ideographic space (U+3000) survives as a field separator.
pub fn collapse_whitespace(text: &str) -> String {
    text.split(|c: char| c.is_ascii_whitespace() || c == '\u{00A0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// All visible text under `el` on one line.
pub fn element_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(el, &mut out);
    collapse_whitespace(&out)
}

/// Visible text under `el` with a line per `<br>` and block element. Empty
/// lines are dropped and each line is whitespace-collapsed.
pub fn block_text(el: ElementRef<'_>) -> Vec<String> {
    let mut out = String::new();
    push_text(el, &mut out);
    out.lines()
        .map(collapse_whitespace)
        .map(|line| line.trim_matches('\u{3000}').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child_el.value().name();
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                let cell = matches!(name, "td" | "th");
                if block {
                    out.push('\n');
                } else if cell {
                    out.push(' ');
                }
                push_text(child_el, out);
                if block {
                    out.push('\n');
                } else if cell {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Non-blank text nodes under `root` with their parent element, document
/// order. Text inside script and style elements is skipped.
pub fn text_nodes(root: ElementRef<'_>) -> Vec<(ElementRef<'_>, String)> {
    let mut out = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let skipped = std::iter::once(parent)
            .chain(parent.ancestors().filter_map(ElementRef::wrap))
            .any(|el| SKIP_TAGS.contains(&el.value().name()));
        if skipped {
            continue;
        }
        let text = collapse_whitespace(text);
        if !text.trim_matches('\u{3000}').is_empty() {
            out.push((parent, text));
        }
    }
    out
}

/// Whether `el` has no block-level descendant.
pub fn is_leaf_block(el: ElementRef<'_>) -> bool {
    !el.descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|d| BLOCK_TAGS.contains(&d.value().name()) || matches!(d.value().name(), "td" | "th"))
}

// ── Labels ──────────────────────────────────────────────────────────────────

/// Field whose longest alias occurs in `key`. Ties go to the earlier field.
pub fn map_label(key: &str, labels: &LabelConfig) -> Option<Field> {
    let key = fold_width(key);
    let key = key.trim();
    if key.is_empty() || key.chars().count() > MAX_LABEL_CHARS {
        return None;
    }
    let mut best: Option<(usize, Field)> = None;
    for field in ALL_FIELDS {
        for alias in labels.aliases(field) {
            let len = alias.chars().count();
            if key.contains(alias.as_str()) && best.map_or(true, |(l, _)| len > l) {
                best = Some((len, field));
            }
        }
    }
    best.map(|(_, field)| field)
}

/// Whether `value` is itself one of the label words, e.g. a header cell read
/// where a value was expected.
pub fn is_label_word(value: &str, labels: &LabelConfig) -> bool {
    let value = fold_width(value);
    let value = value.trim();
    ALL_FIELDS
        .iter()
        .any(|field| labels.aliases(*field).iter().any(|alias| alias == value))
}

const ALL_FIELDS: [Field; 12] = [
    Field::Name,
    Field::Breed,
    Field::Age,
    Field::Gender,
    Field::Color,
    Field::Size,
    Field::Health,
    Field::Personality,
    Field::SpecialNeeds,
    Field::Deadline,
    Field::Protection,
    Field::Status,
];

/// Split one line into `key: value` / `【key】value` segments.
///
/// Segments are separated by ideographic spaces or ` / `; segments without a
/// recognizable key are skipped.
pub fn split_pairs(line: &str) -> Vec<(String, String)> {
    let line = fold_width(line);
    let mut pairs = Vec::new();
    for segment in line.split(['\u{3000}', '|']).flat_map(|s| s.split(" / ")) {
        let segment = segment.trim();
        if let Some(rest) = segment.strip_prefix('【') {
            if let Some((key, value)) = rest.split_once('】') {
                push_pair(&mut pairs, key, value);
            }
            continue;
        }
        if let Some((key, value)) = segment.split_once(':') {
            push_pair(&mut pairs, key, value);
        }
    }
    pairs
}

fn push_pair(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    let key = key.trim();
    let value = value.trim().trim_start_matches(':').trim();
    if !key.is_empty() && key.chars().count() <= MAX_LABEL_CHARS && !value.is_empty() {
        pairs.push((key.to_string(), value.to_string()));
    }
}

/// Labeled values across `lines`, mapped to fields. The first value seen for
/// a field wins.
pub fn labeled_fields(lines: &[String], labels: &LabelConfig) -> Vec<(Field, String)> {
    let mut fields: Vec<(Field, String)> = Vec::new();
    for (key, value) in lines.iter().flat_map(|line| split_pairs(line)) {
        if let Some(field) = map_label(&key, labels) {
            if !fields.iter().any(|(f, _)| *f == field) {
                fields.push((field, value));
            }
        }
    }
    fields
}
