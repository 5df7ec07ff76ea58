//! File parsing: a registry mapping extensions to [`DocumentParser`]s.
//!
//! Parsers turn raw file bytes into one or more [`ParsedPage`]s. The
//! ingestion pipeline assigns document ids only after a parser succeeded, so
//! a malformed file never produces ids or chunks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{RagError, Result};

/// Form feed, used by text extractors to separate pages.
const PAGE_BREAK: char = '\u{000C}';

/// One logical unit of a parsed file, before it becomes a [`Document`](crate::Document).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    /// Extracted text.
    pub text: String,
    /// Parser-provided metadata such as `page`.
    pub metadata: HashMap<String, String>,
}

impl ParsedPage {
    /// A page without metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), metadata: HashMap::new() }
    }
}

/// Turns file bytes into pages.
pub trait DocumentParser: Send + Sync {
    /// Parse `bytes` of the file called `file_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ParseError`] if the content is malformed.
    fn parse(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<ParsedPage>>;

    /// Short parser name used in logs.
    fn name(&self) -> &str;
}

fn decode_utf8<'a>(file_name: &str, bytes: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|e| RagError::ParseError {
        file_name: file_name.to_string(),
        message: format!("invalid UTF-8: {e}"),
    })
}

/// Plain UTF-8 text. Form feeds split the text into numbered pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl DocumentParser for TextParser {
    fn parse(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<ParsedPage>> {
        let text = decode_utf8(file_name, bytes)?;
        if !text.contains(PAGE_BREAK) {
            return Ok(vec![ParsedPage::new(text)]);
        }

        Ok(text
            .split(PAGE_BREAK)
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(i, page)| ParsedPage {
                text: page.to_string(),
                metadata: HashMap::from([("page".to_string(), (i + 1).to_string())]),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "text"
    }
}

/// JSON documents, flattened into one `path: value` line per leaf.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl JsonParser {
    fn flatten(prefix: &str, value: &Value, lines: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                    Self::flatten(&path, child, lines);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    Self::flatten(&format!("{prefix}[{i}]"), child, lines);
                }
            }
            Value::String(s) => lines.push(format!("{prefix}: {s}")),
            Value::Null => {}
            other => lines.push(format!("{prefix}: {other}")),
        }
    }
}

impl DocumentParser for JsonParser {
    fn parse(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<ParsedPage>> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| RagError::ParseError {
            file_name: file_name.to_string(),
            message: e.to_string(),
        })?;
        let mut lines = Vec::new();
        Self::flatten("", &value, &mut lines);
        Ok(vec![ParsedPage::new(lines.join("\n"))])
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// Maps lowercase file extensions to parsers.
///
/// Files without an extension are dispatched by sniffing their content:
/// JSON objects/arrays go to the `json` parser, other valid UTF-8 text to the
/// `txt` parser. Anything else is [`RagError::UnsupportedFormat`].
///
/// # Example
///
/// ```rust,ignore
/// use ragline::{ParserRegistry, TextParser};
///
/// let mut registry = ParserRegistry::with_defaults();
/// registry.register("org", Arc::new(TextParser));
/// let parser = registry.resolve("notes.org", &bytes)?;
/// ```
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with [`TextParser`] and [`JsonParser`] for common extensions.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let text: Arc<dyn DocumentParser> = Arc::new(TextParser);
        for ext in ["txt", "text", "md", "markdown", "rst", "csv", "tsv", "log", "html", "htm", "xml"] {
            registry.register(ext, Arc::clone(&text));
        }
        registry.register("json", Arc::new(JsonParser));
        registry
    }

    /// Register `parser` for `extension` (with or without the leading dot).
    pub fn register(&mut self, extension: &str, parser: Arc<dyn DocumentParser>) {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.parsers.insert(key, parser);
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    /// Pick the parser for a file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnsupportedFormat`] when no parser matches.
    pub fn resolve(&self, file_name: &str, bytes: &[u8]) -> Result<Arc<dyn DocumentParser>> {
        let extension =
            Path::new(file_name).extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);

        match extension {
            Some(ext) => self.parsers.get(&ext).cloned().ok_or_else(|| {
                RagError::UnsupportedFormat { file_name: file_name.to_string(), detail: format!(".{ext}") }
            }),
            None => {
                let sniffed = sniff(bytes);
                self.parsers.get(sniffed).cloned().ok_or_else(|| RagError::UnsupportedFormat {
                    file_name: file_name.to_string(),
                    detail: format!("sniffed content type '{sniffed}'"),
                })
            }
        }
    }

    /// Resolve a parser and run it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::UnsupportedFormat`] or [`RagError::ParseError`].
    pub fn parse(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<ParsedPage>> {
        self.resolve(file_name, bytes)?.parse(file_name, bytes)
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry").field("extensions", &self.extensions()).finish()
    }
}

/// Guess a registry key from the leading bytes of a file.
fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF") {
        return "pdf";
    }
    if bytes.contains(&0) {
        return "bin";
    }
    let Ok(text) = std::str::from_utf8(bytes) else {
        return "bin";
    };
    let trimmed = text.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<Value>(trimmed).is_ok()
    {
        "json"
    } else {
        "txt"
    }
}
