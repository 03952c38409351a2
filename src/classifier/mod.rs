// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Rule-based file classification
//!
//! Filename keyword rules are tried first, then the extension table. The
//! confidence bands used here drive the pipeline's AI escalation:
//! high >= 0.8, medium >= 0.6, anything else is low.

mod rules;

use std::collections::HashMap;

use crate::record::Classification;
use rules::{PatternRule, EXTENSION_RULES, PATTERN_RULES};

/// Lower bound of the high confidence band
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Lower bound of the medium confidence band
pub const MEDIUM_CONFIDENCE: f64 = 0.6;

/// Confidence for an extension nobody recognises
pub const UNKNOWN_EXTENSION_CONFIDENCE: f64 = 0.5;

/// Confidence for a file with no extension at all
pub const NO_EXTENSION_CONFIDENCE: f64 = 0.3;

/// Videos at least this large are filed as movies
const MOVIE_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Band a confidence score falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn of(confidence: f64) -> Self {
        if confidence >= HIGH_CONFIDENCE {
            ConfidenceTier::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Extension and filename-pattern classifier
pub struct RuleClassifier {
    patterns: &'static [PatternRule],
    extensions: HashMap<&'static str, (&'static str, &'static str, f64)>,
}

impl RuleClassifier {
    pub fn new() -> Self {
        let mut extensions = HashMap::new();
        for rule in EXTENSION_RULES {
            for ext in rule.extensions {
                // First table entry wins for an extension listed twice
                extensions
                    .entry(*ext)
                    .or_insert((rule.category, rule.sub_category, rule.confidence));
            }
        }

        Self {
            patterns: PATTERN_RULES,
            extensions,
        }
    }

    /// Classify a file from its name, extension and size.
    ///
    /// Pure: the same inputs always give the same answer.
    pub fn classify(&self, file_name: &str, extension: &str, size_bytes: u64) -> Classification {
        let extension = extension.trim_start_matches('.').to_lowercase();
        let tokens = tokenize(stem_of(file_name, &extension));

        if let Some(rule) = self
            .patterns
            .iter()
            .find(|rule| rule.applies_to(&extension) && matches_keywords(rule.keywords, &tokens))
        {
            return Classification::new(rule.category, rule.sub_category, rule.confidence);
        }

        if extension.is_empty() {
            return Classification::fallback(NO_EXTENSION_CONFIDENCE);
        }

        match self.extensions.get(extension.as_str()) {
            Some(&("Videos", _, confidence)) if size_bytes >= MOVIE_SIZE_BYTES => {
                Classification::new("Videos", "Movies", confidence)
            }
            Some(&(category, sub_category, confidence)) => {
                Classification::new(category, sub_category, confidence)
            }
            None => Classification::fallback(UNKNOWN_EXTENSION_CONFIDENCE),
        }
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Searchable words from a filename, most meaningful first
pub fn filename_keywords(file_name: &str) -> Vec<String> {
    let extension = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    let mut keywords = Vec::new();
    for token in tokenize(stem_of(file_name, extension)) {
        if token.len() >= 3
            && !token.chars().all(|c| c.is_ascii_digit())
            && !is_stop_word(&token)
            && !keywords.contains(&token)
        {
            keywords.push(token);
        }
    }
    keywords
}

fn stem_of<'a>(file_name: &'a str, extension: &str) -> &'a str {
    if extension.is_empty() {
        return file_name;
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case(extension) => stem,
        _ => file_name,
    }
}

/// Split a filename stem into lowercase words.
///
/// Breaks on separators, letter/digit changes and lower-to-upper case
/// changes, so `MeetingNotes_2024v2` gives `meeting notes 2024 v 2`.
fn tokenize(stem: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in stem.chars() {
        if !c.is_alphanumeric() {
            flush(&mut tokens, &mut current);
            prev = None;
            continue;
        }
        if let Some(p) = prev {
            let class_change = p.is_ascii_digit() != c.is_ascii_digit();
            let camel = p.is_lowercase() && c.is_uppercase();
            if class_change || camel {
                flush(&mut tokens, &mut current);
            }
        }
        current.extend(c.to_lowercase());
        prev = Some(c);
    }
    flush(&mut tokens, &mut current);
    tokens
}

fn flush(tokens: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}

/// Short keywords must match a whole word, longer ones may prefix it
fn matches_keywords(keywords: &[&str], tokens: &[String]) -> bool {
    keywords.iter().any(|kw| {
        tokens
            .iter()
            .any(|t| t == kw || (kw.len() >= 4 && t.starts_with(kw)))
    })
}

fn is_stop_word(word: &str) -> bool {
    matches!(word,
        "the" | "and" | "for" | "with" | "from" | "this" | "that" | "are" | "was" | "were"
        | "copy" | "final" | "new"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(name: &str) -> Classification {
        let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        RuleClassifier::new().classify(name, ext, 1024)
    }

    #[test]
    fn test_report_pattern_is_high_confidence() {
        let c = classify("report_Q1.pdf");
        assert_eq!(c.category, "Documents");
        assert_eq!(c.sub_category, "Reports");
        assert_eq!(c.confidence, 0.94);
        assert_eq!(ConfidenceTier::of(c.confidence), ConfidenceTier::High);
    }

    #[test]
    fn test_rule_confidence_bands() {
        for rule in PATTERN_RULES {
            assert!(rule.confidence >= 0.85, "{:?}", rule.keywords);
        }
        for rule in EXTENSION_RULES {
            assert!(
                (MEDIUM_CONFIDENCE..HIGH_CONFIDENCE).contains(&rule.confidence),
                "{:?}",
                rule.extensions
            );
        }
    }

    #[test]
    fn test_extension_fallback_is_medium() {
        let c = classify("holiday.jpg");
        assert_eq!((c.category.as_str(), c.sub_category.as_str()), ("Images", "Photos"));
        assert_eq!(ConfidenceTier::of(c.confidence), ConfidenceTier::Medium);
    }

    #[test]
    fn test_archives_and_installers_stay_medium() {
        for name in ["backup.zip", "tool.exe", "novel.epub", "shot.dng"] {
            let c = classify(name);
            assert_eq!(ConfidenceTier::of(c.confidence), ConfidenceTier::Medium, "{}", name);
        }
    }

    #[test]
    fn test_unknown_extension_is_low_and_others() {
        let c = classify("mystery.xyz");
        assert_eq!(c.category, "Others");
        assert_eq!(c.confidence, 0.5);
        assert_eq!(ConfidenceTier::of(c.confidence), ConfidenceTier::Low);

        let c = classify("Makefile");
        assert_eq!(c.category, "Others");
        assert!(c.confidence < MEDIUM_CONFIDENCE);
    }

    #[test]
    fn test_keyword_needs_matching_extension() {
        // "report" on an image is not a document report
        let c = classify("report.png");
        assert_eq!(c.category, "Images");
        assert_eq!(c.sub_category, "Graphics");
    }

    #[test]
    fn test_first_rule_wins() {
        let c = classify("Screenshot of invoice 2024-03-01.png");
        assert_eq!(c.sub_category, "Screenshots");

        let c = classify("invoice_summary.pdf");
        assert_eq!(c.sub_category, "Invoices");
    }

    #[test]
    fn test_short_keywords_need_whole_word() {
        assert_eq!(classify("CV_jane.pdf").sub_category, "Resumes");
        // "cv" inside another word is not a resume
        assert_eq!(classify("cvs_pharmacy.pdf").sub_category, "PDF");
        assert_eq!(classify("IMG_2041.JPG").sub_category, "Photos");
        assert_eq!(classify("IMG_2041.JPG").confidence, 0.88);
    }

    #[test]
    fn test_camel_case_tokens() {
        assert_eq!(tokenize("MeetingNotes_2024v2"), vec!["meeting", "notes", "2024", "v", "2"]);
        assert_eq!(classify("TeamMeeting.docx").sub_category, "Meeting Notes");
    }

    #[test]
    fn test_large_videos_are_movies() {
        let classifier = RuleClassifier::new();
        let c = classifier.classify("film.mkv", "mkv", 2 * 1024 * 1024 * 1024);
        assert_eq!(c.sub_category, "Movies");
        let c = classifier.classify("clip.mkv", "mkv", 10 * 1024 * 1024);
        assert_eq!(c.sub_category, "Clips");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = RuleClassifier::new();
        let first = classifier.classify("budget_report.xlsx", "xlsx", 4096);
        let second = classifier.classify("budget_report.xlsx", "xlsx", 4096);
        assert_eq!(first, second);
    }

    #[test]
    fn test_filename_keywords() {
        assert_eq!(
            filename_keywords("Quarterly_Report_for_2024_final.pdf"),
            vec!["quarterly", "report"]
        );
    }
}
