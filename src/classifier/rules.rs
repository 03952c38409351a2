// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Built-in rule tables
//!
//! Pattern rules are checked in order and the first match wins, so a more
//! specific rule must come before a broader one.

const IMAGES: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "bmp", "tif", "tiff",
];
const VIDEOS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "m4v", "wmv"];
const DOCUMENTS: &[&str] = &["pdf", "doc", "docx", "odt", "rtf", "txt", "md", "pages"];
const SHEETS: &[&str] = &["xls", "xlsx", "ods", "csv", "numbers"];
const SLIDES: &[&str] = &["ppt", "pptx", "odp", "key", "pdf"];
const INSTALLERS: &[&str] = &["exe", "msi", "dmg", "pkg", "deb", "rpm", "appimage"];

/// A filename keyword rule
pub(crate) struct PatternRule {
    pub keywords: &'static [&'static str],
    /// Groups of extensions the rule applies to; empty means any
    pub extensions: &'static [&'static [&'static str]],
    pub category: &'static str,
    pub sub_category: &'static str,
    pub confidence: f64,
}

impl PatternRule {
    pub fn applies_to(&self, extension: &str) -> bool {
        self.extensions.is_empty()
            || self
                .extensions
                .iter()
                .any(|group| group.iter().any(|e| *e == extension))
    }
}

/// An extension lookup entry
pub(crate) struct ExtensionRule {
    pub extensions: &'static [&'static str],
    pub category: &'static str,
    pub sub_category: &'static str,
    pub confidence: f64,
}

pub(crate) const PATTERN_RULES: &[PatternRule] = &[
    PatternRule {
        keywords: &["screenshot", "screencap", "snip"],
        extensions: &[IMAGES],
        category: "Images",
        sub_category: "Screenshots",
        confidence: 0.95,
    },
    PatternRule {
        keywords: &["screenrecording", "recording", "screencast"],
        extensions: &[VIDEOS],
        category: "Videos",
        sub_category: "Screen Recordings",
        confidence: 0.9,
    },
    PatternRule {
        keywords: &["invoice", "receipt"],
        extensions: &[DOCUMENTS, SHEETS, IMAGES],
        category: "Documents",
        sub_category: "Invoices",
        confidence: 0.92,
    },
    PatternRule {
        keywords: &["statement", "bank", "tax", "payslip", "payroll"],
        extensions: &[DOCUMENTS, SHEETS],
        category: "Documents",
        sub_category: "Finance",
        confidence: 0.9,
    },
    PatternRule {
        keywords: &["resume", "cv", "curriculum"],
        extensions: &[DOCUMENTS],
        category: "Documents",
        sub_category: "Resumes",
        confidence: 0.9,
    },
    PatternRule {
        keywords: &["contract", "agreement", "nda"],
        extensions: &[DOCUMENTS],
        category: "Documents",
        sub_category: "Contracts",
        confidence: 0.9,
    },
    PatternRule {
        keywords: &["meeting", "minutes", "agenda"],
        extensions: &[DOCUMENTS],
        category: "Documents",
        sub_category: "Meeting Notes",
        confidence: 0.9,
    },
    PatternRule {
        keywords: &["report", "summary", "analysis"],
        extensions: &[DOCUMENTS, SHEETS, SLIDES],
        category: "Documents",
        sub_category: "Reports",
        confidence: 0.94,
    },
    PatternRule {
        keywords: &["slides", "deck", "presentation"],
        extensions: &[SLIDES],
        category: "Documents",
        sub_category: "Presentations",
        confidence: 0.88,
    },
    PatternRule {
        keywords: &["scan", "scanned"],
        extensions: &[DOCUMENTS, IMAGES],
        category: "Documents",
        sub_category: "Scans",
        confidence: 0.86,
    },
    PatternRule {
        keywords: &["wallpaper", "background"],
        extensions: &[IMAGES],
        category: "Images",
        sub_category: "Wallpapers",
        confidence: 0.88,
    },
    PatternRule {
        keywords: &["img", "dsc", "dcim", "pxl", "photo"],
        extensions: &[IMAGES],
        category: "Images",
        sub_category: "Photos",
        confidence: 0.88,
    },
    PatternRule {
        keywords: &["setup", "installer", "install"],
        extensions: &[INSTALLERS],
        category: "Installers",
        sub_category: "Setup",
        confidence: 0.9,
    },
];

pub(crate) const EXTENSION_RULES: &[ExtensionRule] = &[
    ExtensionRule { extensions: &["jpg", "jpeg", "heic", "heif"], category: "Images", sub_category: "Photos", confidence: 0.75 },
    ExtensionRule { extensions: &["png", "gif", "bmp", "webp", "tif", "tiff"], category: "Images", sub_category: "Graphics", confidence: 0.7 },
    ExtensionRule { extensions: &["svg", "ai", "eps"], category: "Images", sub_category: "Vector", confidence: 0.7 },
    ExtensionRule { extensions: &["raw", "cr2", "nef", "arw", "dng"], category: "Images", sub_category: "RAW", confidence: 0.78 },
    ExtensionRule { extensions: &["psd", "xcf"], category: "Images", sub_category: "Projects", confidence: 0.75 },
    ExtensionRule { extensions: VIDEOS, category: "Videos", sub_category: "Clips", confidence: 0.75 },
    ExtensionRule { extensions: &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"], category: "Audio", sub_category: "Music", confidence: 0.75 },
    ExtensionRule { extensions: &["pdf"], category: "Documents", sub_category: "PDF", confidence: 0.7 },
    ExtensionRule { extensions: &["doc", "docx", "odt", "rtf", "pages"], category: "Documents", sub_category: "Word", confidence: 0.75 },
    ExtensionRule { extensions: &["txt", "md"], category: "Documents", sub_category: "Text", confidence: 0.65 },
    ExtensionRule { extensions: SHEETS, category: "Documents", sub_category: "Spreadsheets", confidence: 0.75 },
    ExtensionRule { extensions: &["ppt", "pptx", "odp", "key"], category: "Documents", sub_category: "Presentations", confidence: 0.75 },
    ExtensionRule { extensions: &["epub", "mobi", "azw3"], category: "Books", sub_category: "eBooks", confidence: 0.78 },
    ExtensionRule { extensions: &["zip", "rar", "7z", "tar", "gz", "bz2", "xz", "tgz"], category: "Archives", sub_category: "Compressed", confidence: 0.78 },
    ExtensionRule { extensions: &["rs"], category: "Code", sub_category: "Rust", confidence: 0.7 },
    ExtensionRule { extensions: &["py", "ipynb"], category: "Code", sub_category: "Python", confidence: 0.7 },
    ExtensionRule { extensions: &["js", "ts", "jsx", "tsx"], category: "Code", sub_category: "JavaScript", confidence: 0.7 },
    ExtensionRule { extensions: &["go"], category: "Code", sub_category: "Go", confidence: 0.7 },
    ExtensionRule { extensions: &["java", "kt"], category: "Code", sub_category: "JVM", confidence: 0.7 },
    ExtensionRule { extensions: &["c", "h", "cpp", "hpp", "cc"], category: "Code", sub_category: "C and C++", confidence: 0.7 },
    ExtensionRule { extensions: &["html", "css"], category: "Code", sub_category: "Web", confidence: 0.65 },
    ExtensionRule { extensions: &["sh", "bash", "ps1"], category: "Code", sub_category: "Scripts", confidence: 0.65 },
    ExtensionRule { extensions: &["json", "yaml", "yml", "toml", "xml"], category: "Code", sub_category: "Data", confidence: 0.6 },
    ExtensionRule { extensions: &["exe", "msi"], category: "Installers", sub_category: "Windows", confidence: 0.78 },
    ExtensionRule { extensions: &["dmg", "pkg"], category: "Installers", sub_category: "macOS", confidence: 0.78 },
    ExtensionRule { extensions: &["deb", "rpm", "appimage"], category: "Installers", sub_category: "Linux", confidence: 0.78 },
    ExtensionRule { extensions: &["ttf", "otf", "woff", "woff2"], category: "Fonts", sub_category: "Typefaces", confidence: 0.75 },
];
