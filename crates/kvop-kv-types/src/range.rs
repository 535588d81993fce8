//! Key range helpers.
//!
//! A range is `[key, range_end)`. `None` selects the single key, the
//! unbounded marker `"\0"` selects every key `>= key`.

use kvop_constants::api::RANGE_END_UNBOUNDED;

/// Compute the range end that selects every key starting with `prefix`.
///
/// The last character is incremented (`"key/"` becomes `"key0"`). Characters
/// that cannot be incremented are dropped first. An empty prefix, or one made
/// only of such characters, selects the whole keyspace.
pub fn prefix_range_end(prefix: &str) -> String {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = next_char(last) {
            chars.push(next);
            return chars.into_iter().collect();
        }
    }
    RANGE_END_UNBOUNDED.to_string()
}

/// Returns true if `key` falls into the range starting at `start`.
pub fn key_in_range(key: &str, start: &str, range_end: Option<&str>) -> bool {
    match range_end {
        None => key == start,
        Some(RANGE_END_UNBOUNDED) => key >= start,
        Some(end) => key >= start && key < end,
    }
}

fn next_char(c: char) -> Option<char> {
    let mut code = u32::from(c).checked_add(1)?;
    // Skip the surrogate block, it has no char representation.
    if (0xD800..=0xDFFF).contains(&code) {
        code = 0xE000;
    }
    char::from_u32(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_range_end_increments_last_char() {
        assert_eq!(prefix_range_end("key/"), "key0");
        assert_eq!(prefix_range_end("a"), "b");
        assert_eq!(prefix_range_end("foo"), "fop");
    }

    #[test]
    fn prefix_range_end_empty_prefix_is_unbounded() {
        assert_eq!(prefix_range_end(""), "\0");
    }

    #[test]
    fn prefix_range_end_drops_max_char() {
        let prefix = format!("a{}", char::MAX);
        assert_eq!(prefix_range_end(&prefix), "b");
        assert_eq!(prefix_range_end(&char::MAX.to_string()), "\0");
    }

    #[test]
    fn key_in_range_single_key() {
        assert!(key_in_range("a", "a", None));
        assert!(!key_in_range("ab", "a", None));
    }

    #[test]
    fn key_in_range_prefix() {
        let end = prefix_range_end("a/");
        assert!(key_in_range("a/", "a/", Some(&end)));
        assert!(key_in_range("a/1", "a/", Some(&end)));
        assert!(!key_in_range("a0", "a/", Some(&end)));
        assert!(!key_in_range("a", "a/", Some(&end)));
    }

    #[test]
    fn key_in_range_unbounded() {
        assert!(key_in_range("zzz", "b", Some("\0")));
        assert!(!key_in_range("a", "b", Some("\0")));
    }
}
