// Cross-cutting system prompts. Task-specific prompts live next to the code
// that fills them (see generation/prompts.rs).

/// System prompt for follow-up requests whose only job is to return a clean
/// JSON object, e.g. reformatting a broken response.
pub const JSON_ONLY_SYSTEM: &str = "You reformat text into strict JSON. \
    Reply with exactly one JSON object and nothing else: \
    no markdown fences, no commentary, no trailing commas. \
    Keep every field and value from the input; never invent new content.";
