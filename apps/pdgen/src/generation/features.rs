//! Feature Extractor — normalizes one raw input row into the exact payload sent to the model.

use serde::{Deserialize, Serialize};

use crate::generation::prompts::{GENERATION_PROMPT_TEMPLATE, GENERATION_SYSTEM};
use crate::generation::GenerationError;

/// Separators that mark an explicit feature list. When none of these appear,
/// commas are treated as the separator instead.
const LIST_SEPARATORS: &[char] = &[';', '|', '\n', '•'];

/// A single product, as read from one input row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductInput {
    /// Zero-based row index in the input file.
    pub index: usize,
    pub name: String,
    pub features: Vec<String>,
    pub category: String,
    pub audience: String,
    /// Normalized target keywords (lowercase, de-duplicated). May be empty.
    pub keywords: Vec<String>,
}

/// The exact request sent to the model for one product.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub product_name: String,
    pub system: &'static str,
    pub prompt: String,
    /// Keywords requested by the input row; empty means "use whatever the model picks".
    pub target_keywords: Vec<String>,
}

impl ProductInput {
    pub fn from_raw(
        index: usize,
        name: &str,
        features: &str,
        category: &str,
        audience: &str,
        keywords: &str,
    ) -> Self {
        Self {
            index,
            name: collapse_whitespace(name),
            features: split_features(features),
            category: collapse_whitespace(category),
            audience: collapse_whitespace(audience),
            keywords: normalize_keywords(keywords.split(',')),
        }
    }

    /// Features joined back into a single line, as written to the combined CSV.
    pub fn feature_text(&self) -> String {
        self.features.join("; ")
    }
}

/// Splits free-form feature text into a clean, de-duplicated list.
///
/// Leading bullet markers (`-`, `*`) are stripped; comparisons for
/// de-duplication are case-insensitive and keep the first spelling.
pub fn split_features(raw: &str) -> Vec<String> {
    let parts: Vec<&str> = if raw.contains(LIST_SEPARATORS) {
        raw.split(LIST_SEPARATORS).collect()
    } else {
        raw.split(',').collect()
    };

    let mut seen = Vec::<String>::new();
    let mut features = Vec::new();
    for part in parts {
        let cleaned = collapse_whitespace(part.trim().trim_start_matches(&['-', '*'][..]));
        if cleaned.is_empty() {
            continue;
        }
        let key = cleaned.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        features.push(cleaned);
    }
    features
}

/// Trims, lowercases and de-duplicates keywords, dropping empties.
pub fn normalize_keywords<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for kw in keywords {
        let kw = collapse_whitespace(kw.as_ref()).to_lowercase();
        if !kw.is_empty() && !out.contains(&kw) {
            out.push(kw);
        }
    }
    out
}

/// Builds the generation request for one product.
pub fn build_request(product: &ProductInput) -> Result<GenerationRequest, GenerationError> {
    if product.name.is_empty() {
        return Err(GenerationError::InvalidInput(format!(
            "row {} has no product name",
            product.index
        )));
    }
    if product.features.is_empty() {
        return Err(GenerationError::InvalidInput(format!(
            "row {} ('{}') has no features",
            product.index, product.name
        )));
    }

    let features_json = serde_json::to_string_pretty(&product.features)?;
    let keywords_json = serde_json::to_string(&product.keywords)?;

    let prompt = GENERATION_PROMPT_TEMPLATE
        .replace("{name}", &product.name)
        .replace("{category}", or_unspecified(&product.category))
        .replace("{audience}", or_unspecified(&product.audience))
        .replace("{features_json}", &features_json)
        .replace("{keywords_json}", &keywords_json);

    Ok(GenerationRequest {
        product_name: product.name.clone(),
        system: GENERATION_SYSTEM,
        prompt,
        target_keywords: product.keywords.clone(),
    })
}

fn or_unspecified(value: &str) -> &str {
    if value.is_empty() {
        "unspecified"
    } else {
        value
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
