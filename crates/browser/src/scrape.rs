//! Extraction of the note payload embedded in the notes web app's HTML.
//!
//! The page bootstraps its data with calls of the form
//! `loadChunk(JSON.parse('<escaped json>'), "<anything>")`. The argument is a
//! JavaScript single-quoted string literal.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LOAD_CHUNK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"loadChunk\(JSON\.parse\('([^']+)'\), ".*"\)"#).expect("valid loadChunk pattern")
});

static HEX_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\x([0-9a-fA-F]{2})").expect("valid hex escape pattern"));

/// The first `loadChunk` payload in `html`, still escaped.
pub fn extract_load_chunk_json(html: &str) -> Option<&str> {
    LOAD_CHUNK
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Undo the literal escaping: `\xHH` becomes the character with that code
/// point, then `\\` becomes `\`.
pub fn unescape_js(escaped: &str) -> String {
    let decoded = HEX_ESCAPE.replace_all(escaped, |caps: &Captures| {
        u8::from_str_radix(&caps[1], 16)
            .map(|b| char::from(b).to_string())
            .unwrap_or_else(|_| caps[0].to_string())
    });
    decoded.replace(r"\\", r"\")
}
