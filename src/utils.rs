//! String helpers for preparing embedding input.

/// Find the nearest valid UTF-8 char boundary at or before the given byte index.
#[inline]
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Truncate a string to at most `max_len` bytes, ensuring valid UTF-8 boundaries.
#[inline]
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..floor_char_boundary(s, max_len)]
    }
}

/// Truncate a string to at most `max_chars` characters.
///
/// Article text mixes Korean and English, so limits are counted in characters
/// rather than bytes.
#[inline]
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &s[..byte_index],
        None => s,
    }
}
