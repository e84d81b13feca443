//! System prompts for page extraction, one per output format.
//!
//! Callers can override the prompt via
//! [`crate::config::ExtractConfig::system_prompt`]; for `json` the schema
//! block is still appended to an override so the answer stays constrained.

use crate::config::OutputFormat;
use crate::schema::JsonSchema;

/// Default prompt for Markdown output.
pub const MARKDOWN_SYSTEM_PROMPT: &str = r#"You transcribe document page images into clean Markdown.

Rules:
- Reproduce ALL text on the page, in the order a human would read it.
- Use # / ## / ### headings to mirror the visual hierarchy.
- Keep lists as lists (- for bullets, 1. for numbered) with their nesting.
- Render tables as GFM pipe tables; fall back to HTML tables when cells span rows or columns.
- Write formulas in LaTeX: $inline$ and $$display$$.
- Skip page numbers, running headers/footers and purely decorative elements.
- Output ONLY the Markdown. No ```markdown fences, no commentary."#;

/// Default prompt for HTML output.
pub const HTML_SYSTEM_PROMPT: &str = r#"You transcribe document page images into semantic HTML.

Rules:
- Reproduce ALL text on the page, in the order a human would read it.
- Use <h1>–<h4> for headings, <p> for paragraphs, <ul>/<ol>/<li> for lists.
- Render tables with <table>, <thead>, <tbody>, using rowspan/colspan where the page does.
- Use <strong>/<em> to match visual emphasis.
- Skip page numbers, running headers/footers and purely decorative elements.
- Output ONLY an HTML fragment (no <html>, <head> or <body>). No ```html fences, no commentary."#;

/// Default prompt for structured JSON output; the schema is appended.
pub const JSON_SYSTEM_PROMPT: &str = r#"You extract structured data from document page images.

Rules:
- Read the page and fill in the JSON schema below with the values found on it.
- Use only information visible on the page; use null for optional fields that are absent.
- Output ONLY one JSON value that validates against the schema. No ```json fences, no commentary."#;

/// User turn accompanying the page image.
pub fn user_instruction(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Markdown => "Convert this page to Markdown.",
        OutputFormat::Html => "Convert this page to HTML.",
        OutputFormat::Json => "Extract the data on this page as JSON.",
    }
}

/// Build the system prompt for a request.
pub fn system_prompt(
    format: OutputFormat,
    schema: Option<&JsonSchema>,
    override_prompt: Option<&str>,
) -> String {
    let base = override_prompt.unwrap_or(match format {
        OutputFormat::Markdown => MARKDOWN_SYSTEM_PROMPT,
        OutputFormat::Html => HTML_SYSTEM_PROMPT,
        OutputFormat::Json => JSON_SYSTEM_PROMPT,
    });

    match (format, schema) {
        (OutputFormat::Json, Some(schema)) => format!(
            "{base}\n\nJSON schema:\n```json\n{}\n```",
            schema.to_pretty_string()
        ),
        _ => base.to_string(),
    }
}
