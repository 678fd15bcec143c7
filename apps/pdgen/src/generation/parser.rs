//! Response parser — heuristic repair first, then at most `MAX_MODEL_REPAIRS`
//! requests asking the model to reformat its own output.
//!
//! The repaired output is never sent back for another repair beyond the
//! ceiling, so "ask model to reformat" and "parse again" cannot loop.

use tracing::{debug, warn};

use crate::generation::prompts::REPAIR_PROMPT_TEMPLATE;
use crate::generation::repair::{parse_with_heuristics, RepairStep};
use crate::generation::{GenerationError, GenerationResult};
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::TextModel;

/// Hard ceiling on model-assisted repair requests per response.
pub const MAX_MODEL_REPAIRS: u32 = 1;

/// Raw output embedded in a repair prompt is cut to this many characters.
const MAX_REPAIR_INPUT_CHARS: usize = 12_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub result: GenerationResult,
    /// Heuristics applied to the text that finally parsed.
    pub repairs: Vec<RepairStep>,
    /// Number of repair requests sent to the model.
    pub model_repairs: u32,
}

/// Parses raw model output into a `GenerationResult`, escalating to the model
/// when the heuristics in `repair` are not enough.
pub async fn parse_with_repair<M>(model: &M, raw: &str) -> Result<ParseOutcome, GenerationError>
where
    M: TextModel + ?Sized,
{
    let mut text = raw.to_string();
    let mut model_repairs = 0;
    let mut attempts = 0;

    loop {
        match parse_with_heuristics(&text) {
            Ok(repaired) => {
                if !repaired.steps.is_empty() {
                    debug!("Response parsed after heuristics: {:?}", repaired.steps);
                }
                return Ok(ParseOutcome {
                    result: repaired.result,
                    repairs: repaired.steps,
                    model_repairs,
                });
            }
            Err(failure) => {
                attempts += failure.attempts;
                if model_repairs >= MAX_MODEL_REPAIRS {
                    return Err(GenerationError::MalformedResponse {
                        attempts,
                        reason: failure.reason,
                    });
                }
                warn!(
                    "Response still invalid after {} parse attempts ({}), asking model to repair",
                    failure.attempts, failure.reason
                );
            }
        }

        model_repairs += 1;
        let excerpt: String = text.chars().take(MAX_REPAIR_INPUT_CHARS).collect();
        let prompt = REPAIR_PROMPT_TEMPLATE.replace("{raw_output}", &excerpt);
        text = model.complete(&prompt, JSON_ONLY_SYSTEM).await?;
    }
}
