//! Parsing: turn the recognition service's raw reply into [`Fields`].
//!
//! Vision models asked for JSON still wrap it in ```` ```json ```` fences,
//! prefix it with a sentence, or sprinkle zero-width characters from the
//! source document into it. These cleanup rules run before deserialisation.
//! Anything still not a JSON object after them is unparseable output, which
//! fails the page.
//!
//! ## Rule Order
//!
//! 1. Normalise line endings (CRLF → LF)
//! 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 3. Strip outer code fences
//! 4. Cut the outermost `{ … }` span out of any surrounding prose

use crate::error::ExtractionError;
use crate::page::Fields;
use once_cell::sync::Lazy;
use regex::Regex;

/// Parse a raw reply into page fields.
pub fn parse_fields(raw: &str) -> Result<Fields, ExtractionError> {
    let s = normalise_line_endings(raw);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let json = outer_object(&s).ok_or_else(|| {
        ExtractionError::Unparseable(format!("no JSON object in reply: {}", preview(raw)))
    })?;

    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ExtractionError::Unparseable(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ExtractionError::Unparseable(
            "top-level JSON value is not an object".into(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| ExtractionError::Unparseable(format!("unexpected field shape: {e}")))
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule 4: Outermost JSON object ────────────────────────────────────────────

/// The span from the first `{` to its matching `}`, skipping braces inside
/// string literals.
fn outer_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(80) {
        Some((cut, _)) => format!("{}\u{2026}", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
