//! Clean receipt text before it is placed in a model prompt.
//!
//! Receipt and OCR text is untrusted. Invisible characters are stripped,
//! lines that try to speak as a role or override instructions are dropped,
//! and anything resembling the data envelope tags is neutralized.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum characters of receipt text sent to the model.
pub const MAX_INPUT_CHARS: usize = 20_000;

pub const DATA_OPEN_TAG: &str = "<receipt_data>";
pub const DATA_CLOSE_TAG: &str = "</receipt_data>";

static ENVELOPE_TAG: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*/?\s*receipt_data[^>]*>"));

/// Sanitized text plus the number of lines dropped as injection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    pub text: String,
    pub removed_lines: usize,
}

pub fn sanitize_receipt_text(raw: &str) -> Sanitized {
    let visible = remove_invisible_chars(raw);
    let (kept, removed_lines) = drop_injection_lines(&visible);
    let neutralized = neutralize_envelope_tags(&kept);
    Sanitized {
        text: truncate_chars(neutralized.trim(), MAX_INPUT_CHARS),
        removed_lines,
    }
}

/// Wrap sanitized text in the data envelope the system prompt refers to.
pub fn wrap_as_data(sanitized: &str) -> String {
    format!("{}\n{}\n{}", DATA_OPEN_TAG, sanitized, DATA_CLOSE_TAG)
}

fn remove_invisible_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            if matches!(*c, ' ' | '\n' | '\t') {
                return true;
            }
            if matches!(
                *c,
                '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}'..='\u{2064}'
                    | '\u{2066}'..='\u{2069}' | '\u{FEFF}'
            ) {
                return false;
            }
            !c.is_control()
        })
        .collect()
}

fn is_role_marker(line: &str) -> bool {
    const MARKERS: [&str; 10] = [
        "system:",
        "assistant:",
        "user:",
        "developer:",
        "[system]",
        "[assistant]",
        "[inst]",
        "[/inst]",
        "<<sys>>",
        "<|im_start|>",
    ];
    MARKERS.iter().any(|m| line.starts_with(m))
}

fn is_override_attempt(line: &str) -> bool {
    const PHRASES: [&str; 10] = [
        "ignore previous instructions",
        "ignore all instructions",
        "ignore the above",
        "disregard your instructions",
        "disregard all instructions",
        "forget your instructions",
        "new instructions:",
        "you are now",
        "pretend to be",
        "system prompt",
    ];
    PHRASES.iter().any(|p| line.contains(p))
}

fn drop_injection_lines(text: &str) -> (String, usize) {
    let mut removed = 0usize;
    let kept: Vec<&str> = text
        .lines()
        .filter(|line| {
            let lowered = line.trim().to_lowercase();
            if is_role_marker(&lowered) || is_override_attempt(&lowered) {
                removed += 1;
                false
            } else {
                true
            }
        })
        .collect();
    (kept.join("\n"), removed)
}

fn neutralize_envelope_tags(text: &str) -> String {
    match ENVELOPE_TAG.as_ref() {
        Ok(re) => re.replace_all(text, "[tag removed]").into_owned(),
        // Pattern is a constant; fall back to stripping angle brackets
        Err(_) => text.replace(['<', '>'], ""),
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
