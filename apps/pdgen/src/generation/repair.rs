//! Heuristic JSON repair for model output.
//!
//! The heuristics are a fixed, ordered list. They are applied cumulatively
//! and the text is re-parsed after every step that changed it:
//!
//! 1. `StripCodeFence`       — drop ```` ```json ```` / ```` ``` ```` wrappers
//! 2. `TrimToObject`         — drop prose around the top-level object
//! 3. `RemoveTrailingCommas` — `,` directly before `}` or `]` (outside strings)
//! 4. `BalanceDelimiters`    — restore a missing opening `{`, close an open
//!                             string, drop stray closers, append missing
//!                             `]` / `}` in nesting order
//!
//! Anything these four cannot fix is escalated to the model (see `parser`).

use serde::Serialize;

use crate::generation::GenerationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStep {
    StripCodeFence,
    TrimToObject,
    RemoveTrailingCommas,
    BalanceDelimiters,
}

impl RepairStep {
    pub const ALL: [RepairStep; 4] = [
        RepairStep::StripCodeFence,
        RepairStep::TrimToObject,
        RepairStep::RemoveTrailingCommas,
        RepairStep::BalanceDelimiters,
    ];

    pub fn apply(self, text: &str) -> String {
        match self {
            RepairStep::StripCodeFence => strip_json_fences(text).to_string(),
            RepairStep::TrimToObject => trim_to_object(text).to_string(),
            RepairStep::RemoveTrailingCommas => remove_trailing_commas(text),
            RepairStep::BalanceDelimiters => balance_delimiters(text),
        }
    }
}

/// A successful parse plus the heuristics it needed.
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub result: GenerationResult,
    pub steps: Vec<RepairStep>,
}

/// Every heuristic was tried and the text is still not a valid result.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairFailure {
    /// Number of parse attempts made (strict parse included).
    pub attempts: u32,
    /// Error from the last attempt.
    pub reason: String,
}

/// Strict parse: valid JSON, matching schema, passing `validate`.
pub fn parse_strict(text: &str) -> Result<GenerationResult, String> {
    let result: GenerationResult = serde_json::from_str(text).map_err(|e| e.to_string())?;
    result.validate()?;
    Ok(result)
}

/// Strict parse first, then each heuristic in order until one parses.
pub fn parse_with_heuristics(raw: &str) -> Result<Repaired, RepairFailure> {
    let mut attempts = 1;
    let mut reason = match parse_strict(raw) {
        Ok(result) => {
            return Ok(Repaired {
                result,
                steps: Vec::new(),
            })
        }
        Err(e) => e,
    };

    let mut text = raw.to_string();
    let mut steps = Vec::new();
    for step in RepairStep::ALL {
        let next = step.apply(&text);
        if next == text {
            continue;
        }
        text = next;
        steps.push(step);
        attempts += 1;
        match parse_strict(&text) {
            Ok(result) => return Ok(Repaired { result, steps }),
            Err(e) => reason = e,
        }
    }

    Err(RepairFailure { attempts, reason })
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
/// Text without a leading fence is returned untouched.
fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return text;
    };
    rest.trim_start()
        .strip_suffix("```")
        .map(|s| s.trim())
        .unwrap_or(rest.trim_start())
}

/// Slices from the first `{` to the brace that closes it. If the object never
/// closes (truncated output), everything from the first `{` is kept.
///
/// Text that already opens with a bare `"key":` is an object that lost its
/// opening brace; it is left alone for `balance_delimiters`.
fn trim_to_object(text: &str) -> &str {
    if starts_with_bare_key(text) {
        return text;
    }
    let Some(start) = text.find('{') else {
        return text;
    };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[start..start + offset + c.len_utf8()];
                }
            }
            _ => {}
        }
    }
    &text[start..]
}

fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// True when the first token is a string immediately followed by `:`.
fn starts_with_bare_key(text: &str) -> bool {
    let Some(rest) = text.trim_start().strip_prefix('"') else {
        return false;
    };
    let mut escaped = false;
    for (offset, c) in rest.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return rest[offset + 1..].trim_start().starts_with(':');
        }
    }
    false
}

fn balance_delimiters(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut expected: Vec<char> = Vec::new();
    if starts_with_bare_key(text) {
        expected.push('}');
        out.push('{');
    }
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                expected.push('}');
                out.push(c);
            }
            '[' => {
                expected.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if !expected.contains(&c) {
                    // stray closer
                    continue;
                }
                // auto-close anything still open inside this one
                while let Some(closer) = expected.pop() {
                    out.push(closer);
                    if closer == c {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    if !expected.is_empty() {
        let trimmed_len = out.trim_end().trim_end_matches(',').len();
        out.truncate(trimmed_len);
    }
    while let Some(closer) = expected.pop() {
        out.push(closer);
    }
    out
}
