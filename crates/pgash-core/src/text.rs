//! Fixed-capacity inline strings.
//!
//! Every string field in a shared record is a fixed-size byte array with an
//! explicit length, never a pointer into a separate buffer. This keeps each
//! record self-contained and independently copyable, which is what allows
//! history slots to be copied out under a short per-slot lock.

/// Capacity of name-like fields (user, database, application, wait event,
/// state, backend type, client address/hostname). Matches NAMEDATALEN.
pub const NAME_LEN: usize = 64;

/// Capacity of statement text fields. Matches the default
/// `track_activity_query_size`.
pub const QUERY_TEXT_LEN: usize = 1024;

/// A name-sized bounded string.
pub type NameStr = BoundedStr<NAME_LEN>;

/// A statement-text-sized bounded string.
pub type QueryStr = BoundedStr<QUERY_TEXT_LEN>;

/// Fixed-capacity string: an inline `[u8; N]` buffer plus explicit length.
///
/// The payload occupies at most `N - 1` bytes; the remainder of the buffer
/// is zeroed, so the content is always NUL-terminated within the buffer.
/// Truncation backs off to a UTF-8 character boundary, so a stored value is
/// always valid UTF-8 and never ends in a partial multi-byte sequence.
#[derive(Clone, Copy)]
pub struct BoundedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedStr<N> {
    /// The empty string. All buffer bytes are zero.
    pub const fn empty() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Builds a bounded string from `s`, truncating if necessary.
    pub fn new(s: &str) -> Self {
        let mut out = Self::empty();
        out.set(s);
        out
    }

    /// Overwrites the content with `s`, truncated to at most `N - 1` bytes
    /// at a character boundary. The tail of the buffer is zeroed.
    pub fn set(&mut self, s: &str) {
        self.buf = [0; N];
        let len = floor_char_boundary(s, N - 1);
        self.buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        self.len = len;
    }

    /// Returns the stored content.
    pub fn as_str(&self) -> &str {
        // Only char-boundary prefixes of valid &str are ever stored.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }

    /// Length of the stored content in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for BoundedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> PartialEq for BoundedStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for BoundedStr<N> {}

impl<const N: usize> std::fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> std::fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Largest prefix length of `s` that is at most `max` bytes and falls on a
/// character boundary.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_is_stored_verbatim() {
        let s: BoundedStr<8> = BoundedStr::new("abc");
        assert_eq!(s.as_str(), "abc");
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn truncates_to_capacity_minus_one() {
        let s: BoundedStr<8> = BoundedStr::new("abcdefghij");
        assert_eq!(s.as_str(), "abcdefg");
        assert_eq!(s.len(), 7);
    }

    #[test]
    fn truncation_never_splits_a_multibyte_character() {
        // 'é' is 2 bytes; capacity 8 leaves 7 payload bytes, which would
        // otherwise land in the middle of the fourth 'é'.
        let s: BoundedStr<8> = BoundedStr::new("éééééé");
        assert_eq!(s.as_str(), "ééé");
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn set_zeroes_the_previous_tail() {
        let mut s: BoundedStr<8> = BoundedStr::new("abcdefg");
        s.set("x");
        assert_eq!(s.as_str(), "x");
        // The byte after the payload is the terminator.
        assert_eq!(s.buf[1], 0);
        assert!(s.buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_is_all_zero() {
        let s: BoundedStr<4> = BoundedStr::empty();
        assert!(s.is_empty());
        assert!(s.buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn query_text_truncates_long_statement() {
        let long = "x".repeat(QUERY_TEXT_LEN * 2);
        let s = QueryStr::new(&long);
        assert_eq!(s.len(), QUERY_TEXT_LEN - 1);
    }
}
