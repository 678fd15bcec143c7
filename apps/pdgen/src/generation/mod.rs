// Product copy generation.
// Implements: feature extraction, prompt building, response repair, parsing.
// All model calls go through llm_client; no direct HTTP here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm_client::LlmError;

pub mod features;
pub mod parser;
pub mod prompts;
pub mod repair;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Malformed model response after {attempts} parse attempts: {reason}")]
    MalformedResponse { attempts: u32, reason: String },

    #[error("Invalid input row: {0}")]
    InvalidInput(String),

    #[error("Failed to build prompt: {0}")]
    Prompt(#[from] serde_json::Error),
}

impl GenerationError {
    /// Whether a fresh attempt (new model call) might succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            GenerationError::Llm(e) => e.is_transient(),
            GenerationError::MalformedResponse { .. } => true,
            GenerationError::InvalidInput(_) | GenerationError::Prompt(_) => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GenerationError::Llm(LlmError::RateLimited { .. }))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::Llm(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Website-facing copy block. Optional in the model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebsiteCopy {
    #[serde(default)]
    pub hero_blurb: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub website_description: String,
    #[serde(default)]
    pub website_bullets: Vec<String>,
}

/// Structured product copy parsed from the model response.
///
/// `title`, `short_description`, `long_description`, `bullets` and `keywords`
/// are required in the JSON; the rest default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub title: String,
    #[serde(default)]
    pub meta_description: String,
    pub short_description: String,
    pub long_description: String,
    pub bullets: Vec<String>,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<WebsiteCopy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title_suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meta_suggestions: Vec<String>,
}

impl GenerationResult {
    /// Schema checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("`title` is empty".to_string());
        }
        if self.long_description.trim().is_empty() {
            return Err("`long_description` is empty".to_string());
        }
        Ok(())
    }
}
