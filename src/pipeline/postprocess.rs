//! Post-processing: deterministic cleanup of raw VLM answers.
//!
//! Even well-prompted models wrap their answer in code fences, emit `\r\n`,
//! sprinkle zero-width characters, or invent placeholder image links. The
//! rules here fix those quirks without touching content, so prompts can stay
//! focused on what to extract.
//!
//! Text formats get [`clean_text`]; JSON answers go through
//! [`extract_json_text`] before parsing.

use crate::config::OutputFormat;
use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a markdown or html answer.
///
/// Rules, in order:
/// 1. Strip one outer code fence (```` ```markdown ````, ```` ```html ````, bare ```` ``` ````)
/// 2. Normalise line endings (CRLF/CR → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse runs of 3+ blank lines to one blank line
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Markdown only: drop placeholder image links, keeping their alt text
/// 7. Trim leading/trailing blank space of the whole page
pub fn clean_text(input: &str, format: OutputFormat) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    let s = if format == OutputFormat::Markdown {
        remove_placeholder_images(&s)
    } else {
        s
    };
    s.trim_matches('\n').trim().to_string()
}

/// Isolate the JSON payload of an answer: strip fences, then fall back to the
/// outermost span opened by the first `{` or `[` when the model added prose
/// around it.
pub fn extract_json_text(input: &str) -> String {
    let s = remove_invisible_chars(&strip_outer_fence(input));
    let trimmed = s.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed.to_string();
    }
    let Some(start) = trimmed.find(['{', '[']) else {
        return trimmed.to_string();
    };
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    match trimmed.rfind(close) {
        Some(end) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

// ── Rule 1: Strip outer code fence ───────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("valid fence regex")
});

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rules 2–5: Whitespace and invisible characters ───────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank-line regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 6: Placeholder image links ──────────────────────────────────────────

static RE_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").expect("valid image regex"));

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "placehold.it",
    "dummyimage.com",
    "picsum.photos",
];

/// A link the page could not have contained: relative, empty, or a known
/// placeholder host.
fn is_placeholder_url(url: &str) -> bool {
    let u = url.trim();
    if !(u.starts_with("http://") || u.starts_with("https://")) {
        return true;
    }
    PLACEHOLDER_HOSTS.iter().any(|h| u.contains(h))
}

fn remove_placeholder_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if !is_placeholder_url(&caps[2]) {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}
