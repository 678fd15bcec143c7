//! SEO scoring — pure, deterministic keyword analysis of generated copy.
//!
//! Algorithm:
//! 1. Tokenize (lowercase, words = runs of alphanumerics or `_`)
//! 2. Count each target keyword as a token-sequence match
//! 3. density = occurrences / word count of `long_description`
//! 4. Emit suggestions for length limits, missing keywords and stuffing (> 3%)
//!
//! No I/O and no model calls; everything here is safe to call in tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::generation::features::normalize_keywords;
use crate::generation::GenerationResult;

pub const MAX_TITLE_CHARS: usize = 60;
pub const MAX_META_CHARS: usize = 160;
/// Above this fraction of words a keyword reads as stuffing.
pub const MAX_KEYWORD_DENSITY: f64 = 0.03;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeoMode {
    #[default]
    Full,
    /// Lengths only, no keyword analysis or suggestions.
    Fast,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeoMetrics {
    pub title_length: usize,
    pub meta_length: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub title_has_keyword: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta_has_keyword: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keyword_occurrences: BTreeMap<String, usize>,
    /// Fraction of `long_description` words, 0.0 – 1.0.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keyword_density: BTreeMap<String, f64>,
    #[serde(default)]
    pub long_description_words: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeoReport {
    pub metrics: SeoMetrics,
    pub suggestions: Vec<String>,
}

/// Keywords to score against: the row's own list when it has one, otherwise
/// whatever the model chose.
pub fn target_keywords(requested: &[String], result: &GenerationResult) -> Vec<String> {
    if requested.is_empty() {
        normalize_keywords(&result.keywords)
    } else {
        normalize_keywords(requested)
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Number of times `keyword` (possibly multi-word) appears in `tokens`.
pub fn count_occurrences(tokens: &[String], keyword: &str) -> usize {
    let needle = tokenize(keyword);
    if needle.is_empty() || needle.len() > tokens.len() {
        return 0;
    }
    tokens.windows(needle.len()).filter(|w| *w == needle.as_slice()).count()
}

/// occurrences / word count; 0.0 for text with no words.
pub fn keyword_density(tokens: &[String], keyword: &str) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    count_occurrences(tokens, keyword) as f64 / tokens.len() as f64
}

/// Builds the SEO report for one generated product.
pub fn analyze(result: &GenerationResult, keywords: &[String], mode: SeoMode) -> SeoReport {
    let mut metrics = SeoMetrics {
        title_length: result.title.trim().chars().count(),
        meta_length: result.meta_description.trim().chars().count(),
        ..SeoMetrics::default()
    };

    if mode == SeoMode::Fast {
        return SeoReport {
            metrics,
            suggestions: vec![],
        };
    }

    let title_tokens = tokenize(&result.title);
    let meta_tokens = tokenize(&result.meta_description);
    let long_tokens = tokenize(&result.long_description);
    metrics.long_description_words = long_tokens.len();

    for kw in keywords {
        let occurrences = count_occurrences(&long_tokens, kw);
        let density = keyword_density(&long_tokens, kw);
        metrics
            .title_has_keyword
            .insert(kw.clone(), count_occurrences(&title_tokens, kw) > 0);
        metrics
            .meta_has_keyword
            .insert(kw.clone(), count_occurrences(&meta_tokens, kw) > 0);
        metrics.keyword_occurrences.insert(kw.clone(), occurrences);
        metrics.keyword_density.insert(kw.clone(), density);
    }

    let suggestions = build_suggestions(&metrics, keywords);
    SeoReport {
        metrics,
        suggestions,
    }
}

fn build_suggestions(metrics: &SeoMetrics, keywords: &[String]) -> Vec<String> {
    let mut suggestions = Vec::new();

    if metrics.title_length > MAX_TITLE_CHARS {
        suggestions.push(format!(
            "Title is {} chars; shorten to {MAX_TITLE_CHARS} or fewer and keep the primary keyword near the start.",
            metrics.title_length
        ));
    }
    if metrics.meta_length > MAX_META_CHARS {
        suggestions.push(format!(
            "Meta description is {} chars; shorten to 120-155 chars and include the primary keyword once.",
            metrics.meta_length
        ));
    }
    for kw in keywords {
        if metrics.title_has_keyword.get(kw) == Some(&false) {
            suggestions.push(format!(
                "Keyword '{kw}' not found in title; consider adding it near the start."
            ));
        }
    }
    for kw in keywords {
        if metrics.meta_has_keyword.get(kw) == Some(&false) {
            suggestions.push(format!(
                "Keyword '{kw}' not found in meta description; include it naturally."
            ));
        }
    }
    for kw in keywords {
        match metrics.keyword_density.get(kw).copied() {
            Some(d) if d == 0.0 => suggestions.push(format!(
                "Keyword '{kw}' not found in long description; include it naturally."
            )),
            Some(d) if d > MAX_KEYWORD_DENSITY => suggestions.push(format!(
                "Keyword '{kw}' density is {:.1}%; reduce repetition to stay under {:.0}%.",
                d * 100.0,
                MAX_KEYWORD_DENSITY * 100.0
            )),
            _ => {}
        }
    }

    suggestions
}

/// Light non-LLM fixes: enforce title/meta length limits and make sure the
/// first keyword appears in the title when there is room for it.
pub fn apply_auto_fixes(result: &mut GenerationResult, keywords: &[String]) {
    let mut title = truncate_to_words(result.title.trim(), MAX_TITLE_CHARS);
    let meta = truncate_to_words(result.meta_description.trim(), MAX_META_CHARS);

    if let Some(first) = keywords.first() {
        if count_occurrences(&tokenize(&title), first) == 0 {
            let keyword = capitalize(first);
            let dashed = format!("{keyword} – {title}");
            let spaced = format!("{keyword} {title}");
            if dashed.chars().count() <= MAX_TITLE_CHARS {
                title = dashed;
            } else if spaced.chars().count() <= MAX_TITLE_CHARS {
                title = spaced;
            }
        }
    }

    result.title = title;
    result.meta_description = meta;
}

/// Cuts `text` to at most `max_chars`, preferring the last word boundary.
pub fn truncate_to_words(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars + 1).collect();
    let cut = match head.rsplit_once(' ') {
        Some((before, _)) if !before.trim().is_empty() => before.to_string(),
        _ => head.chars().take(max_chars).collect(),
    };
    cut.trim_end_matches(&[' ', ',', '.', '-', ';', ':'][..]).to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
