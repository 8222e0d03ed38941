//! Unicode hygiene predicates for free-text metadata fields.
//!
//! Detection only: input is never rewritten. Invoked by the v1.3 schema
//! check; v1.2 documents are not sanitized.

use regex::Regex;

/// Default cap on consecutive combining marks used by the schema check.
pub const MAX_COMBINING_RUN: usize = 3;

/// True if the text contains a run of consecutive combining marks (Unicode
/// categories Mn/Mc/Me) longer than `max_consecutive`. Rejects Zalgo-style
/// visual abuse while leaving ordinary accented text alone.
pub fn has_excessive_combining(text: &str, max_consecutive: usize) -> bool {
    let runs = Regex::new(r"\p{M}+").expect("regex for combining mark runs");
    let has_long_run = runs
        .find_iter(text)
        .any(|run| run.as_str().chars().count() > max_consecutive);
    has_long_run
}

/// True if the text contains any prohibited control codepoint:
/// U+FFF9..FFFB (interlinear annotation anchors), U+202A..202E (bidi
/// embedding/override), U+2066..2069 (bidi isolates).
pub fn has_prohibited_codepoints(text: &str) -> bool {
    let prohibited = Regex::new(r"[\x{FFF9}-\x{FFFB}\x{202A}-\x{202E}\x{2066}-\x{2069}]")
        .expect("regex for prohibited codepoints");
    prohibited.is_match(text)
}
