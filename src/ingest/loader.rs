//! Document loaders keyed by file extension.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use ignore::WalkBuilder;
use pulldown_cmark::{Event, Parser, TagEnd};
use regex::Regex;
use scraper::{Html, Node};
use thiserror::Error;
use tracing::{debug, warn};

/// Text extracted from one source file (or one CSV row).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source: String,
    pub content: String,
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("failed to walk {path}")]
    Walk {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },
}

const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "pdf", "docx", "html", "htm", "csv"];

#[must_use]
pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// The key a file is stored under: absolute, forward slashes.
#[must_use]
pub fn source_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .replace('\\', "/")
}

/// Load every supported file below `dir` whose source key is not in `ignored`.
pub fn load_documents(dir: &Path, ignored: &HashSet<String>) -> Result<Vec<Document>, LoaderError> {
    let mut paths = Vec::new();
    for entry in WalkBuilder::new(dir).hidden(false).build() {
        let entry = entry.map_err(|source| LoaderError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && is_supported(path) {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        let key = source_key(&path);
        if ignored.contains(&key) {
            debug!("Skipping already ingested {key}");
            continue;
        }
        let loaded = load_file(&path, &key)?;
        if loaded.is_empty() {
            warn!("No text extracted from {key}");
        }
        documents.extend(loaded);
    }
    Ok(documents)
}

/// Load one file. CSV files produce one document per row.
pub fn load_file(path: &Path, source: &str) -> Result<Vec<Document>, LoaderError> {
    let ext = extension(path).unwrap_or_default();
    let texts = match ext.as_str() {
        "txt" => vec![read_text(path)?],
        "md" => vec![markdown_to_text(&read_text(path)?)],
        "html" | "htm" => vec![html_to_text(&read_text(path)?)],
        "pdf" => vec![load_pdf(path)?],
        "docx" => vec![load_docx(path)?],
        "csv" => load_csv(path)?,
        _ => Vec::new(),
    };

    Ok(texts
        .into_iter()
        .map(|t| clean_text(&t))
        .filter(|t| !t.is_empty())
        .map(|content| Document {
            source: source.to_string(),
            content,
        })
        .collect())
}

fn read_text(path: &Path) -> Result<String, LoaderError> {
    let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn parse_error(path: &Path, reason: impl std::fmt::Display) -> LoaderError {
    LoaderError::Parse {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn markdown_to_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock | TagEnd::Item,
            ) => out.push_str("\n\n"),
            _ => {}
        }
    }
    out
}

fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut parts = Vec::new();

    for node in doc.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "head"))
        });
        if !hidden && !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }
    parts.join("\n")
}

fn load_pdf(path: &Path) -> Result<String, LoaderError> {
    let doc = lopdf::Document::load(path).map_err(|e| parse_error(path, e))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Ok(String::new());
    }
    doc.extract_text(&pages).map_err(|e| parse_error(path, e))
}

fn load_docx(path: &Path) -> Result<String, LoaderError> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| parse_error(path, e))?;

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        let DocumentChild::Paragraph(paragraph) = child else {
            continue;
        };
        let mut line = String::new();
        for pc in &paragraph.children {
            let ParagraphChild::Run(run) = pc else {
                continue;
            };
            for rc in &run.children {
                match rc {
                    RunChild::Text(t) => line.push_str(&t.text),
                    RunChild::Tab(_) => line.push('\t'),
                    RunChild::Break(_) => line.push('\n'),
                    _ => {}
                }
            }
        }
        paragraphs.push(line);
    }
    Ok(paragraphs.join("\n\n"))
}

fn load_csv(path: &Path) -> Result<Vec<String>, LoaderError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| parse_error(path, e))?;
    let headers = reader.headers().map_err(|e| parse_error(path, e))?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| parse_error(path, e))?;
        let row = record
            .iter()
            .enumerate()
            .map(|(i, value)| match headers.get(i) {
                Some(h) => format!("{h}: {value}"),
                None => value.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        rows.push(row);
    }
    Ok(rows)
}

/// Collapse runs of blanks and blank lines; trim.
fn clean_text(text: &str) -> String {
    static BLANKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
    static BLANK_LINES: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").unwrap());

    let text = text.replace("\r\n", "\n");
    let text = BLANKS.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}
