//! Content readers and chunking
//!
//! Readers turn a [`Source`] into plain text (text, HTML and PDF through
//! `lopdf`); the [`TextChunker`] splits that text into overlapping,
//! word-aligned chunks ready for embedding.

use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Where a document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Local file
    Path(PathBuf),
    /// Remote document fetched over HTTP(S)
    Url(String),
}

impl Source {
    /// Interpret a locator string: `http(s)://` is a URL, anything else a path
    pub fn parse(locator: &str) -> Self {
        let trimmed = locator.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }

    /// Display form stored on every record
    pub fn locator(&self) -> String {
        match self {
            Self::Path(p) => p.display().to_string(),
            Self::Url(u) => u.clone(),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.locator())
    }
}

/// Text extracted from a source
#[derive(Debug, Clone)]
pub struct SourceContent {
    pub locator: String,
    pub text: String,
}

impl SourceContent {
    /// Fingerprint of locator and content, hex-encoded SHA-256
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.locator.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Extracts text from a source
#[async_trait]
pub trait ContentReader: Send + Sync {
    async fn read(&self, source: &Source) -> Result<SourceContent>;
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "log", "rst", "text"];
const HTML_EXTENSIONS: &[&str] = &["html", "htm"];
const PDF_EXTENSION: &str = "pdf";

/// Reader for local files and HTTP(S) documents: plain text, HTML and PDF
pub struct DocumentReader {
    client: reqwest::Client,
}

impl DocumentReader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn read_path(&self, path: &Path) -> Result<String> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let is_pdf = ext == PDF_EXTENSION;
        let is_html = HTML_EXTENSIONS.contains(&ext.as_str());
        if !ext.is_empty() && !is_pdf && !is_html && !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::Ingestion(format!(
                "unsupported content type '.{}' for {}",
                ext,
                path.display()
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Ingestion(format!("cannot read {}: {}", path.display(), e)))?;

        if is_pdf {
            return extract_pdf(bytes, path.display().to_string()).await;
        }

        let text = String::from_utf8(bytes).map_err(|_| {
            Error::Ingestion(format!("{} is not valid UTF-8 text", path.display()))
        })?;
        Ok(if is_html { strip_html(&text) } else { text })
    }

    async fn read_url(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Ingestion(format!("cannot fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Ingestion(format!("{} returned {}", url, status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/plain")
            .to_ascii_lowercase();

        if content_type.starts_with("application/pdf") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::Ingestion(format!("cannot read body of {}: {}", url, e)))?;
            return extract_pdf(bytes.to_vec(), url.to_string()).await;
        }

        if !(content_type.starts_with("text/") || content_type.contains("json")) {
            return Err(Error::Ingestion(format!(
                "unsupported content type '{}' for {}",
                content_type, url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Ingestion(format!("cannot read body of {}: {}", url, e)))?;

        Ok(if content_type.starts_with("text/html") {
            strip_html(&body)
        } else {
            body
        })
    }
}

/// Parse a PDF off the async runtime and return its page text
async fn extract_pdf(bytes: Vec<u8>, locator: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        pdf_text(&bytes)
            .map_err(|e| Error::Ingestion(format!("cannot parse PDF {}: {}", locator, e)))
    })
    .await
    .map_err(|e| Error::Ingestion(format!("PDF extraction task failed: {}", e)))?
}

/// Text shown by the `Tj`, `TJ`, `'` and `"` operators, page by page.
///
/// Positioning operators end a line. Strings that are not UTF-8 are read as
/// Latin-1, which covers the standard single-byte font encodings.
pub fn pdf_text(bytes: &[u8]) -> std::result::Result<String, lopdf::Error> {
    let doc = lopdf::Document::load_mem(bytes)?;
    let mut out = String::new();

    for page_id in doc.get_pages().into_values() {
        let content = lopdf::content::Content::decode(&doc.get_page_content(page_id)?)?;
        let mut line = String::new();

        for operation in content.operations {
            match operation.operator.as_str() {
                "Tj" | "'" | "\"" => {
                    if let Some(operand) = operation.operands.last() {
                        push_pdf_string(&mut line, operand);
                    }
                }
                "TJ" => {
                    if let Some(lopdf::Object::Array(items)) = operation.operands.first() {
                        for item in items {
                            push_pdf_string(&mut line, item);
                        }
                    }
                }
                "Td" | "TD" | "T*" | "ET" => flush_line(&mut out, &mut line),
                _ => {}
            }
            if operation.operator == "'" || operation.operator == "\"" {
                flush_line(&mut out, &mut line);
            }
        }
        flush_line(&mut out, &mut line);
    }

    Ok(out)
}

fn push_pdf_string(line: &mut String, object: &lopdf::Object) {
    if let lopdf::Object::String(bytes, _) = object {
        match std::str::from_utf8(bytes) {
            Ok(text) => line.push_str(text),
            Err(_) => line.extend(bytes.iter().map(|b| *b as char)),
        }
    }
}

fn flush_line(out: &mut String, line: &mut String) {
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        out.push_str(trimmed);
        out.push('\n');
    }
    line.clear();
}

#[async_trait]
impl ContentReader for DocumentReader {
    async fn read(&self, source: &Source) -> Result<SourceContent> {
        let text = match source {
            Source::Path(path) => self.read_path(path).await?,
            Source::Url(url) => self.read_url(url).await?,
        };

        if text.trim().is_empty() {
            return Err(Error::Ingestion(format!("{} contains no text", source)));
        }

        Ok(SourceContent {
            locator: source.locator(),
            text,
        })
    }
}

/// Remove scripts, styles and tags, then collapse whitespace
pub fn strip_html(html: &str) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();

    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
            .expect("static pattern compiles")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static pattern compiles"));

    let without_blocks = blocks.replace_all(html, " ");
    let without_tags = tags.replace_all(&without_blocks, " ");
    without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-aligned fixed-size chunker with overlap
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TextChunker {
    /// `overlap` is clamped below `chunk_size` so every chunk makes progress
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size / 2),
        }
    }

    /// Split text into chunks of at most `chunk_size` characters.
    ///
    /// A single word longer than the limit becomes its own chunk.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0usize;

        for word in words {
            let word_len = word.chars().count();
            let added = if current.is_empty() { word_len } else { word_len + 1 };

            if !current.is_empty() && current_len + added > self.chunk_size {
                chunks.push(current.join(" "));

                let mut tail: Vec<&str> = Vec::new();
                let mut tail_len = 0usize;
                for w in current.iter().rev() {
                    let len = w.chars().count() + usize::from(!tail.is_empty());
                    if tail_len + len > self.overlap {
                        break;
                    }
                    tail_len += len;
                    tail.push(w);
                }
                tail.reverse();
                current = tail;
                current_len = tail_len;
            }

            current_len += if current.is_empty() { word_len } else { word_len + 1 };
            current.push(word);
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(1000, 100)
    }
}
