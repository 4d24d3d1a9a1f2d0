// The analyser's passes are line-oriented text scans that split on `=` and
// `;`. Both characters may legally occur inside a string literal, so every
// quoted substring is swapped for an opaque placeholder before any scan runs
// and swapped back afterwards.
use std::sync::LazyLock;

use regex_lite::Regex;

// Private-use codepoints cannot appear in script source, so a placeholder
// can never collide with user text.
const OPEN: char = '\u{e000}';
const CLOSE: char = '\u{e001}';

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap());

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("{OPEN}(\\d+){CLOSE}")).unwrap());

/// Holds the string literals removed by [`protect`], indexed by placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardBuffer {
    fragments: Vec<String>,
}

impl GuardBuffer {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Replaces every quoted substring (single- or double-quoted, non-greedy)
/// with a placeholder token encoding an index into the returned buffer.
///
/// Each call starts from a fresh buffer, so protecting already-protected
/// text is a no-op apart from allocating an empty buffer.
pub fn protect(text: &str) -> (String, GuardBuffer) {
    let mut buffer = GuardBuffer::default();
    let protected = QUOTED
        .replace_all(text, |caps: &regex_lite::Captures| {
            let index = buffer.fragments.len();
            buffer.fragments.push(caps[0].to_string());
            format!("{OPEN}{index}{CLOSE}")
        })
        .into_owned();
    (protected, buffer)
}

/// Restores the string literals captured by the matching [`protect`] call.
/// Text outside placeholders is returned unchanged.
pub fn restore(text: &str, buffer: &GuardBuffer) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &regex_lite::Captures| {
            let index: usize = caps[1].parse().unwrap_or(usize::MAX);
            buffer
                .fragments
                .get(index)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
