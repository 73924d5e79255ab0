//! Base-62 digits for `%x` columns.
//!
//! Alphabet is `0-9A-Za-z`, most significant digit first. Only non-negative
//! values have a representation.

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Encodes a non-negative integer, or returns `None` for negative input.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::base62;
///
/// assert_eq!(base62::encode(0).as_deref(), Some("0"));
/// assert_eq!(base62::encode(320).as_deref(), Some("5A"));
/// assert_eq!(base62::encode(-1), None);
/// ```
#[must_use]
pub fn encode(value: i64) -> Option<String> {
    let mut n = u64::try_from(value).ok()?;
    if n == 0 {
        return Some("0".to_string());
    }
    let mut digits = Vec::with_capacity(11);
    while n > 0 {
        digits.push(ALPHABET[(n % 62) as usize]);
        n /= 62;
    }
    digits.reverse();
    String::from_utf8(digits).ok()
}

/// Decodes a digit string. Fails on an empty string, a foreign character or
/// overflow past `i64::MAX`.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::base62;
///
/// assert_eq!(base62::decode("5A"), Some(320));
/// assert_eq!(base62::decode("-1"), None);
/// ```
#[must_use]
pub fn decode(digits: &str) -> Option<i64> {
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for byte in digits.bytes() {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'A'..=b'Z' => byte - b'A' + 10,
            b'a'..=b'z' => byte - b'a' + 36,
            _ => return None,
        };
        n = n.checked_mul(62)?.checked_add(i64::from(digit))?;
    }
    Some(n)
}
