//! Key namespace composition
//!
//! Full keys in a cache tree are formed by joining namespace segments with a
//! separator character. Every namespace prefix ends in the separator, so a
//! prefix concatenated with a local key never runs two segments together.

/// Separator used by trees that do not configure their own.
pub const DEFAULT_SEPARATOR: char = '/';

/// Ensure `key` ends with `separator`, appending it when missing.
///
/// The empty string normalizes to the bare separator. Already-terminated
/// keys pass through unchanged, so normalization is idempotent.
pub fn normalize(key: &str, separator: char) -> String {
    if key.ends_with(separator) {
        key.to_string()
    } else {
        format!("{key}{separator}")
    }
}

/// Join a parent namespace prefix and a local key into a full key.
///
/// The local key is normalized, so the result is itself usable as a prefix.
/// An absent parent composes against the bare separator.
pub fn compose(parent: Option<&str>, local: &str, separator: char) -> String {
    let mut out = match parent {
        Some(parent) => parent.to_string(),
        None => separator.to_string(),
    };
    out.push_str(&normalize(local, separator));
    out
}
