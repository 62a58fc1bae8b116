//! Destination naming rules.
//!
//! Archive paths are used verbatim as object keys, so they are checked, never
//! rewritten: a key that breaks a rule is rejected outright.

use thiserror::Error;

pub const MAX_OBJECT_KEY_LEN: usize = 1024;
pub const MAX_KEY_SEGMENTS: usize = 254;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("object key must not be empty")]
    EmptyKey,
    #[error("object key is {len} bytes long, the limit is {MAX_OBJECT_KEY_LEN}")]
    KeyTooLong { len: usize },
    #[error("object key has {count} path segments, the limit is {MAX_KEY_SEGMENTS}")]
    TooManySegments { count: usize },
    #[error("object key {key:?} invalid: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: &'static str },
}

/// Check that `raw` can be used as an object key and hand it back unchanged.
pub fn validate_object_key(raw: &str) -> Result<&str, NamingError> {
    let invalid = |reason| NamingError::InvalidKey {
        key: raw.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(NamingError::EmptyKey);
    }
    if raw.len() > MAX_OBJECT_KEY_LEN {
        return Err(NamingError::KeyTooLong { len: raw.len() });
    }
    if raw.chars().any(|c| c.is_control()) {
        return Err(invalid("contains control characters"));
    }
    if raw.contains('\\') {
        return Err(invalid("contains a backslash"));
    }
    if raw.starts_with('/') {
        return Err(invalid("must not start with `/`"));
    }
    if raw.ends_with('/') || raw.ends_with('.') {
        return Err(invalid("must not end with `/` or `.`"));
    }

    let count = raw.split('/').count();
    if count > MAX_KEY_SEGMENTS {
        return Err(NamingError::TooManySegments { count });
    }
    for segment in raw.split('/') {
        match segment {
            "" => return Err(invalid("contains an empty path segment")),
            "." | ".." => return Err(invalid("contains a relative path segment")),
            _ => {}
        }
    }

    Ok(raw)
}

/// Validate a destination container name.
///
/// - 3–63 characters
/// - lowercase letters, digits and hyphens only
/// - starts and ends with a letter or digit
/// - no consecutive hyphens
pub fn validate_container_name(name: &str) -> Result<(), NamingError> {
    let invalid = |reason| NamingError::InvalidContainerName {
        name: name.to_string(),
        reason,
    };

    let len = name.len();
    if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, and hyphens",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }
    if name.contains("--") {
        return Err(invalid("cannot contain consecutive hyphens"));
    }
    Ok(())
}
