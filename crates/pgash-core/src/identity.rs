//! Statement trimming and derived query identities.
//!
//! When the host's parser does not assign a query identity (utility
//! statements), one is derived by hashing the trimmed statement text, so
//! repeated statements of identical text collapse to the same identity
//! across samples.

use xxhash_rust::xxh3::xxh3_64;

/// Byte offset/length delimiting one statement within a possibly
/// multi-statement source string, as reported by the parse hook.
///
/// A negative `location` means the position is unknown and the whole source
/// is the statement; a `length` of zero or less means "rest of string".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatementRange {
    pub location: i32,
    pub length: i32,
}

impl StatementRange {
    /// The whole source string is the statement.
    pub const WHOLE: StatementRange = StatementRange {
        location: -1,
        length: 0,
    };
}

/// Whitespace as the SQL lexer classifies it: space, tab, newline,
/// carriage return and form feed. Not general Unicode whitespace — trimmed
/// text must match what the lexer would have tokenized.
pub fn is_lexer_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c)
}

/// Strips leading and trailing lexer whitespace.
pub fn trim_lexer_space(s: &str) -> &str {
    let bytes = s.as_bytes();
    let mut start = 0;
    let mut end = bytes.len();
    while start < end && is_lexer_space(bytes[start]) {
        start += 1;
    }
    while end > start && is_lexer_space(bytes[end - 1]) {
        end -= 1;
    }
    // Lexer whitespace is ASCII, so the slice stays on char boundaries.
    &s[start..end]
}

/// Extracts the statement delimited by `range` from `source` and trims it.
///
/// If the location is unknown (negative) the length is distrusted as well
/// and the whole source is used. Offsets that would split a multi-byte
/// character are backed off to the previous boundary.
pub fn clip_statement<'a>(source: &'a str, range: StatementRange) -> &'a str {
    let (start, len) = if range.location >= 0 && (range.location as usize) <= source.len() {
        let start = floor_boundary(source, range.location as usize);
        let rest = source.len() - start;
        let len = if range.length <= 0 {
            rest
        } else {
            (range.length as usize).min(rest)
        };
        (start, len)
    } else {
        (0, source.len())
    };
    let end = floor_boundary(source, start + len);
    trim_lexer_space(&source[start..end])
}

/// Derives a stable 64-bit identity for a statement from its trimmed text.
///
/// Pure, seed-fixed hash over the byte sequence: identical text always
/// yields the same identity.
pub fn query_identity(trimmed: &str) -> u64 {
    xxh3_64(trimmed.as_bytes())
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
