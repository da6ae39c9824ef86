use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::DocketError;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Plain-text extraction from a PDF. `max_pages` limits extraction to the
/// leading pages.
pub trait TextExtractor {
    fn extract(&self, path: &Path, max_pages: Option<u32>) -> Result<String, DocketError>;
}

/// Shells out to poppler's `pdftotext`.
#[derive(Debug, Clone)]
pub struct PdfToTextExtractor {
    program: Option<PathBuf>,
}

impl PdfToTextExtractor {
    pub fn from_path() -> Self {
        Self {
            program: find_in_path("pdftotext"),
        }
    }

    pub fn with_program(program: PathBuf) -> Self {
        Self {
            program: Some(program),
        }
    }
}

impl TextExtractor for PdfToTextExtractor {
    fn extract(&self, path: &Path, max_pages: Option<u32>) -> Result<String, DocketError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| DocketError::MissingTool("pdftotext".to_string()))?;
        let mut cmd = Command::new(program);
        if let Some(pages) = max_pages {
            cmd.args(["-f", "1", "-l", &pages.to_string()]);
        }
        cmd.arg(path).arg("-");
        let output = cmd
            .output()
            .map_err(|err| DocketError::TextExtraction(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("pdftotext failed on {}", path.display())
            } else {
                stderr
            };
            return Err(DocketError::TextExtraction(message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub(crate) fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Splits `text` into chunks of at most `max_bytes`, breaking at the last
/// blank line before the limit, else the last newline, else hard.
pub fn chunk_text(text: &str, max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_bytes {
        let limit = floor_char_boundary(rest, max_bytes);
        let window = &rest[..limit];
        let split = window
            .rfind("\n\n")
            .filter(|&idx| idx > 0)
            .or_else(|| window.rfind('\n').filter(|&idx| idx > 0))
            .unwrap_or(limit.max(1));
        let split = if rest.is_char_boundary(split) {
            split
        } else {
            ceil_char_boundary(rest, split)
        };
        chunks.push(rest[..split].to_string());
        rest = &rest[split..];
    }
    if !rest.trim().is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut idx = index.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut idx = index.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Drops markup tags and collapses whitespace.
pub fn strip_html(html: &str) -> String {
    collapse_whitespace(&TAG.replace_all(html, ""))
}

/// Removes tags but keeps the text layout.
pub fn strip_tags(html: &str) -> String {
    TAG.replace_all(html, "").trim().to_string()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn unescape_name(name: &str) -> String {
    name.replace("&amp;", "&").replace("&#039;", "'")
}

/// Greedy word wrap to `width` columns; continuation lines are prefixed with
/// `indent`.
pub fn wrap_text(text: &str, width: usize, indent: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if current.is_empty() {
            let prefix = if lines.is_empty() { "" } else { indent };
            current.push_str(prefix);
            current.push_str(word);
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}
