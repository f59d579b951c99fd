//! Raw bytes to canonical plain text.
//!
//! Output depends only on the bytes and the hint: no clocks, no hash-map
//! iteration, no locale. HTML is walked in document order, skipping markup
//! that is never substantive (scripts, styling, navigation, footers, cookie
//! banners) and emitting one line per block element.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{node::Element, ElementRef, Html, Node};
use serde_json::Value;

use crate::error::NormalizationError;
use crate::types::capture::{Charset, ContentHint, Markup};

/// Elements dropped with their whole subtree.
const SKIP_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "nav", "header", "footer", "aside", "form",
    "iframe", "svg", "button", "select", "template", "canvas", "object",
];

/// Elements that start and end a line.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "body", "caption", "dd", "div", "dl", "dt",
    "figcaption", "figure", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol",
    "p", "pre", "section", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Windows-1252 code points for 0x80..=0x9F. Unassigned bytes keep their
/// Latin-1 value.
const WINDOWS_1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{2C6}', '\u{2030}', '\u{160}', '\u{2039}', '\u{152}', '\u{8D}', '\u{17D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{2DC}', '\u{2122}', '\u{161}', '\u{203A}', '\u{153}', '\u{9D}', '\u{17E}', '\u{178}',
];

lazy_static! {
    static ref BOILERPLATE: Regex = Regex::new(
        r"(?i)cookie|popup|modal|banner|newsletter|subscribe|consent|tracking|advert|share-buttons"
    )
    .unwrap();
}

/// Normalize a raw capture to plain text.
pub fn normalize(raw: &[u8], hint: ContentHint) -> Result<String, NormalizationError> {
    let text = match hint.markup {
        Markup::Pdf => pdf_text(raw)?,
        Markup::Html => html_text(&decode(raw, hint.charset)?),
        Markup::Json => json_text(raw, &decode(raw, hint.charset)?)?,
        Markup::PlainText => plain_text(&decode(raw, hint.charset)?),
    };

    if text.is_empty() {
        return Err(NormalizationError::new("no text content", raw));
    }
    Ok(text)
}

fn decode(raw: &[u8], charset: Charset) -> Result<String, NormalizationError> {
    let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
    match charset {
        Charset::Latin1 => Ok(raw.iter().map(|&b| b as char).collect()),
        Charset::Windows1252 => Ok(raw
            .iter()
            .map(|&b| match b {
                0x80..=0x9F => WINDOWS_1252_HIGH[usize::from(b - 0x80)],
                _ => b as char,
            })
            .collect()),
        Charset::Utf8 => std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| NormalizationError::new(format!("invalid UTF-8: {e}"), raw)),
        Charset::Unknown => std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| NormalizationError::new("unsupported charset", raw)),
    }
}

fn html_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = LineBuffer::default();
    walk(document.root_element(), &mut lines);
    lines.finish()
}

fn walk(element: ElementRef<'_>, lines: &mut LineBuffer) {
    let name = element.value().name();
    if SKIP_TAGS.contains(&name) || is_boilerplate(element.value()) {
        return;
    }
    if name == "br" {
        lines.flush();
        return;
    }

    let block = BLOCK_TAGS.contains(&name);
    if block {
        lines.flush();
    }
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, lines);
        } else if let Node::Text(text) = child.value() {
            lines.push(text);
        }
    }
    if block {
        lines.flush();
    }
}

fn is_boilerplate(element: &Element) -> bool {
    if element.attr("hidden").is_some() || element.attr("aria-hidden") == Some("true") {
        return true;
    }
    ["id", "class", "role"]
        .iter()
        .filter_map(|attr| element.attr(attr))
        .any(|value| BOILERPLATE.is_match(value))
}

fn plain_text(text: &str) -> String {
    let mut lines = LineBuffer::default();
    for line in text.lines() {
        lines.push(line);
        lines.flush();
    }
    lines.finish()
}

fn json_text(raw: &[u8], text: &str) -> Result<String, NormalizationError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| NormalizationError::new(format!("invalid JSON: {e}"), raw))?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

/// Compact JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(feature = "pdf")]
fn pdf_text(raw: &[u8]) -> Result<String, NormalizationError> {
    let text = pdf_extract::extract_text_from_mem(raw)
        .map_err(|e| NormalizationError::new(format!("PDF extraction failed: {e}"), raw))?;
    Ok(plain_text(&text))
}

#[cfg(not(feature = "pdf"))]
fn pdf_text(raw: &[u8]) -> Result<String, NormalizationError> {
    Err(NormalizationError::new(
        "PDF support not compiled in (enable the `pdf` feature)",
        raw,
    ))
}

/// Accumulates text into whitespace-collapsed, deduplicated lines.
#[derive(Default)]
struct LineBuffer {
    lines: Vec<String>,
    current: String,
}

impl LineBuffer {
    fn push(&mut self, text: &str) {
        self.current.push_str(text);
    }

    fn flush(&mut self) {
        // split_whitespace also folds U+00A0.
        let line = self.current.split_whitespace().collect::<Vec<_>>().join(" ");
        self.current.clear();
        if line.is_empty() || self.lines.last() == Some(&line) {
            return;
        }
        self.lines.push(line);
    }

    fn finish(mut self) -> String {
        self.flush();
        self.lines.join("\n")
    }
}
