// All model prompt constants for the Generation module.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for product copy generation.
pub const GENERATION_SYSTEM: &str = "You are an expert e-commerce copywriter and SEO specialist. \
    You write accurate, persuasive product copy using only the features you are given. \
    You MUST respond with valid JSON only: a single JSON object. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// Product copy prompt template.
/// Replace: {name}, {features_json}, {category}, {audience}, {keywords_json}
pub const GENERATION_PROMPT_TEMPLATE: &str = r#"Generate a detailed, SEO-optimized product description.

Product name: {name}
Category: {category}
Target audience: {audience}
Features (source of truth — do NOT invent others):
{features_json}

Primary keywords to use naturally (do NOT keyword-stuff):
{keywords_json}

Return ONLY a JSON object with this EXACT structure:
{
  "title": "...",
  "meta_description": "...",
  "short_description": "...",
  "long_description": "...",
  "bullets": ["...", "..."],
  "keywords": ["...", "..."],
  "website": {
    "hero_blurb": "...",
    "tagline": "...",
    "website_description": "...",
    "website_bullets": ["...", "..."]
  },
  "title_suggestions": ["...", "..."],
  "meta_suggestions": ["...", "..."]
}

HARD RULES:
1. `title` at most 60 characters, primary keyword near the start
2. `meta_description` at most 160 characters
3. `short_description` one or two sentences
4. `long_description` two to four paragraphs
5. `bullets` three to six items, each grounded in a listed feature
6. `keywords` five to ten search phrases"#;

/// Repair prompt. Replace `{raw_output}` before sending.
pub const REPAIR_PROMPT_TEMPLATE: &str = r#"The following text was supposed to be a single JSON object describing a product, but it is not valid JSON.

Fix it and return VALID JSON only. Keep every field and value that is present; do not add commentary.
Required fields: "title", "meta_description", "short_description", "long_description", "bullets", "keywords".

TEXT TO FIX:
{raw_output}"#;
