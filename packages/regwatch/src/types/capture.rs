//! Raw captures and the hints used to normalize them.

use chrono::{DateTime, Utc};

/// Bytes retrieved from a source, uninterpreted.
#[derive(Debug, Clone)]
pub struct RawCapture {
    /// URL after redirects
    pub final_url: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub status: u16,
    pub fetched_at: DateTime<Utc>,
}

impl RawCapture {
    pub fn new(final_url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            final_url: final_url.into(),
            bytes: bytes.into(),
            content_type: None,
            status: 200,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Markup family of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    Html,
    PlainText,
    Json,
    Pdf,
}

/// Declared text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    /// ISO-8859-1, decoded byte-per-codepoint
    Latin1,
    /// Latin-1 with printable punctuation in 0x80..=0x9F
    Windows1252,
    /// Declared but unsupported; decoded as UTF-8 or rejected
    Unknown,
}

/// Encoding and markup hint handed to the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHint {
    pub markup: Markup,
    pub charset: Charset,
}

impl Default for ContentHint {
    fn default() -> Self {
        Self {
            markup: Markup::Html,
            charset: Charset::Utf8,
        }
    }
}

impl ContentHint {
    pub fn new(markup: Markup, charset: Charset) -> Self {
        Self { markup, charset }
    }

    /// Resolve a hint for a capture.
    ///
    /// The source's expected content type wins over the response header;
    /// a `%PDF` signature always wins.
    pub fn resolve(expected: Option<&str>, capture: &RawCapture) -> Self {
        let declared = expected.or(capture.content_type.as_deref());
        let mut hint = declared.map(Self::from_content_type).unwrap_or_default();

        // Response charset still applies when the expected type omits one.
        if expected.is_some() && !has_charset(expected) {
            if let Some(header) = capture.content_type.as_deref() {
                hint.charset = Self::from_content_type(header).charset;
            }
        }

        if capture.bytes.starts_with(b"%PDF") {
            hint.markup = Markup::Pdf;
        }
        hint
    }

    /// Parse a MIME type such as `text/html; charset=iso-8859-1`.
    pub fn from_content_type(content_type: &str) -> Self {
        let lower = content_type.to_ascii_lowercase();
        let mut parts = lower.split(';').map(str::trim);
        let mime = parts.next().unwrap_or_default();

        let markup = match mime {
            "text/plain" | "text/markdown" | "text/csv" => Markup::PlainText,
            "application/json" | "text/json" => Markup::Json,
            m if m.ends_with("+json") => Markup::Json,
            "application/pdf" | "pdf" => Markup::Pdf,
            "json" => Markup::Json,
            "text" => Markup::PlainText,
            _ => Markup::Html,
        };

        let charset = parts
            .find_map(|p| p.strip_prefix("charset="))
            .map(|c| match c.trim_matches('"') {
                "utf-8" | "utf8" | "us-ascii" | "ascii" => Charset::Utf8,
                "iso-8859-1" | "latin1" | "latin-1" => Charset::Latin1,
                "windows-1252" | "cp1252" | "x-cp1252" => Charset::Windows1252,
                _ => Charset::Unknown,
            })
            .unwrap_or(Charset::Utf8);

        Self { markup, charset }
    }
}

fn has_charset(content_type: Option<&str>) -> bool {
    content_type
        .map(|c| c.to_ascii_lowercase().contains("charset="))
        .unwrap_or(false)
}
