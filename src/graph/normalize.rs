//! Canonical document identifiers
//!
//! Users type identifiers in many shapes ("Art. 240 ET", "artículo 240",
//! "Ley 2277 de 2022"). The graph and the vector store key documents by a
//! single slug form: `et-art-240`, `ley-2277-2022`, `decreto-1625-2016`,
//! `resolucion-165-2023`, `sentencia-c-481-2019`.

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

struct IdPatterns {
    canonical: Regex,
    article: Regex,
    law: Regex,
    decree: Regex,
    resolution: Regex,
    ruling: Regex,
}

impl IdPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            canonical: Regex::new(
                r"^(et-art-\d+(-\d+)?|ley-\d+-\d{4}|decreto-\d+-\d{4}|resolucion-\d+-\d{4}|sentencia-[a-z]{1,3}-\d+-\d{4})$",
            )?,
            article: Regex::new(
                r"^(?:art(?:iculo|\.)?\s*)?(\d+(?:-\d+)?)\s*(?:(?:del\s+)?(?:e\.?\s?t\.?|estatuto tributario))?$",
            )?,
            law: Regex::new(r"^ley\s+(\d+)(?:\s+de\s+|\s*/\s*)(\d{4})$")?,
            decree: Regex::new(
                r"^decreto(?:\s+(?:ley|legislativo|reglamentario))?\s+(\d+)(?:\s+de\s+|\s*/\s*)(\d{4})$",
            )?,
            resolution: Regex::new(
                r"^resolucion(?:\s+dian)?\s+(\d+)(?:\s+de\s+|\s*/\s*)(\d{4})$",
            )?,
            ruling: Regex::new(
                r"^sentencia\s+([a-z]{1,3})\s*-?\s*(\d+)(?:\s+de\s+|\s*/\s*)(\d{4})$",
            )?,
        })
    }
}

fn patterns() -> Result<&'static IdPatterns, &'static regex::Error> {
    static PATTERNS: OnceLock<Result<IdPatterns, regex::Error>> = OnceLock::new();
    PATTERNS.get_or_init(IdPatterns::compile).as_ref()
}

/// Lowercase, strip accents and collapse whitespace
fn fold(raw: &str) -> String {
    let stripped: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Turn a free-text document reference into its canonical id
pub fn normalize_document_id(raw: &str) -> String {
    let folded = fold(raw);
    let p = match patterns() {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "Identifier patterns unavailable, falling back to slug");
            return slugify(&folded);
        }
    };

    if p.canonical.is_match(&folded) {
        return folded;
    }
    if let Some(c) = p.article.captures(&folded) {
        return format!("et-art-{}", &c[1]);
    }
    if let Some(c) = p.law.captures(&folded) {
        return format!("ley-{}-{}", &c[1], &c[2]);
    }
    if let Some(c) = p.decree.captures(&folded) {
        return format!("decreto-{}-{}", &c[1], &c[2]);
    }
    if let Some(c) = p.resolution.captures(&folded) {
        return format!("resolucion-{}-{}", &c[1], &c[2]);
    }
    if let Some(c) = p.ruling.captures(&folded) {
        return format!("sentencia-{}-{}-{}", &c[1], &c[2], &c[3]);
    }

    slugify(&folded)
}
