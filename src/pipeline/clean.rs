//! Cleanup of VLM output before it is embedded or shown to the user.
//!
//! Models sometimes wrap their whole answer in a ```` ```markdown ```` fence,
//! emit `\r\n`, or leave zero-width characters behind. Those artefacts change
//! embeddings without carrying meaning, so image descriptions and answers
//! pass through the same small set of rules.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md|text)?[ \t]*\n(.*)\n```$").unwrap());

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

/// Normalise a model reply. Order matters: line endings are fixed before
/// the fence regex runs, and trimming happens last.
pub fn clean_model_text(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = strip_outer_fence(s.trim());
    let s: String = s.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    let s = s
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let s = RE_BLANK_RUN.replace_all(&s, "\n\n");
    s.trim().to_string()
}

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}
