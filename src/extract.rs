// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Text excerpts sent along with AI classification requests

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::{Result, WardenError};

/// Extensions read as plain text
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "adoc", "csv", "tsv", "json", "log", "yaml", "yml",
    "toml", "xml", "html",
];

/// Upper bound on bytes read from a plain text file
const MAX_TEXT_BYTES: u64 = 256 * 1024;

/// Extract a short text excerpt, or `None` for binary formats and unreadable files
pub fn excerpt(path: &Path, max_chars: usize) -> Option<String> {
    if max_chars == 0 {
        return None;
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let text = if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        extract_text_file(path)
    } else if ext == "pdf" {
        extract_pdf(path)
    } else {
        return None;
    };

    match text {
        Ok(text) => {
            let text = collapse_whitespace(&text);
            if text.is_empty() {
                None
            } else {
                Some(truncate_chars(&text, max_chars))
            }
        }
        Err(e) => {
            debug!("No excerpt for {:?}: {}", path, e);
            None
        }
    }
}

/// Most frequent meaningful words of a text, most frequent first
pub fn top_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4 && !w.chars().all(|c| c.is_ascii_digit()))
    {
        let word = word.to_lowercase();
        if !is_common_word(&word) {
            *counts.entry(word).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    // Ties broken alphabetically so the same text always gives the same list
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

fn extract_text_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.take(MAX_TEXT_BYTES).read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_pdf(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    // pdf-extract panics on some malformed files
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes))
        .map_err(|_| unreadable_pdf("parser panicked"))?;
    extracted.map_err(|e| unreadable_pdf(&e.to_string()))
}

fn unreadable_pdf(reason: &str) -> WardenError {
    WardenError::FileSystem(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("PDF text extraction failed: {}", reason),
    ))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn is_common_word(word: &str) -> bool {
    matches!(word,
        "this" | "that" | "with" | "from" | "have" | "will" | "were" | "been" | "their"
        | "there" | "which" | "about" | "would" | "these" | "other" | "into" | "more"
        | "some" | "than" | "then" | "them" | "when" | "what" | "your" | "also"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_excerpt_is_truncated_on_char_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "Grüße   aus\n\nBerlin und Köln").unwrap();

        assert_eq!(excerpt(&path, 8).as_deref(), Some("Grüße au..."));
        assert_eq!(excerpt(&path, 100).as_deref(), Some("Grüße aus Berlin und Köln"));
    }

    #[test]
    fn test_binary_formats_have_no_excerpt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, [0xff, 0xd8, 0xff]).unwrap();
        assert!(excerpt(&path, 100).is_none());
    }

    #[test]
    fn test_broken_pdf_has_no_excerpt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.7\n1 0 obj << /Type /Catalog /Pages 9 0 R >>\nendobj\ntrailer <<").unwrap();
        assert!(excerpt(&path, 100).is_none());
    }

    #[test]
    fn test_top_keywords_ranks_by_frequency() {
        let text = "Invoice number 42. Invoice total due. Payment terms: payment within 30 days. Invoice.";
        assert_eq!(top_keywords(text, 2), vec!["invoice", "payment"]);
    }
}
