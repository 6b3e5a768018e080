//! Input checks shared by the resolvers and the HTTP layer.
//!
//! Failed checks yield `Validation` errors, which the HTTP layer maps to `400 Bad Request`.

use crate::error::ErrorKind;
use crate::forum_bail;
use regex::Regex;
use std::sync::LazyLock;

pub const MAX_TOPIC_LENGTH: usize = 64;
pub const MAX_USERNAME_LENGTH: usize = 64;
pub const MAX_TITLE_LENGTH: usize = 300;
pub const MAX_BODY_LENGTH: usize = 40_000;
pub const MAX_IMAGE_LENGTH: usize = 2048;
pub const MAX_COMMENT_LENGTH: usize = 10_000;

pub fn is_valid_str(data: &str, min_length: usize, max_length: usize) -> bool {
    let len = data.chars().count();
    len >= min_length && len <= max_length
}

pub fn validate_str<S: AsRef<str>>(
    field_name: &str,
    data: S,
    min_length: usize,
    max_length: usize,
) -> anyhow::Result<S> {
    if !is_valid_str(data.as_ref(), min_length, max_length) {
        forum_bail!(
            ErrorKind::Validation,
            "'{}' must be between {} and {} characters long",
            field_name,
            min_length,
            max_length
        );
    }

    Ok(data)
}

/// Allowed: a-z, A-Z, 0-9, _, -, :, /, .
static VALID_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\-:/.]{1,128}$").expect("Invalid regex"));

pub fn is_valid_id(id: &str) -> bool {
    VALID_ID_REGEX.is_match(id)
}

pub fn validate_id<S: AsRef<str>>(field_name: &str, id: S) -> anyhow::Result<S> {
    if !is_valid_id(id.as_ref()) {
        forum_bail!(
            ErrorKind::Validation,
            "'{}' must only contain letters, digits, '_', '-', ':', '/' or '.'",
            field_name
        );
    }

    Ok(id)
}

/// Topics end up inside index keys, so they must not contain the key delimiter.
pub fn validate_topic<S: AsRef<str>>(topic: S) -> anyhow::Result<S> {
    let topic = validate_str("topic", topic, 1, MAX_TOPIC_LENGTH)?;
    if topic.as_ref().contains('#') || topic.as_ref().trim() != topic.as_ref() {
        forum_bail!(
            ErrorKind::Validation,
            "'topic' must neither contain '#' nor leading or trailing whitespace"
        );
    }

    Ok(topic)
}

pub fn validate_username<S: AsRef<str>>(username: S) -> anyhow::Result<S> {
    let username = validate_str("username", username, 1, MAX_USERNAME_LENGTH)?;
    if username.as_ref().trim().is_empty() {
        forum_bail!(ErrorKind::Validation, "'username' must not be blank");
    }

    Ok(username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::kind_of;

    #[test]
    fn string_lengths_are_bounded() {
        assert!(is_valid_str("abc", 1, 3));
        assert!(!is_valid_str("", 1, 3));
        assert!(!is_valid_str("abcd", 1, 3));
        assert!(is_valid_str("äöü", 1, 3));

        let err = validate_str("title", "", 1, 10).unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Validation));
    }

    #[test]
    fn ids_accept_generated_and_vote_ids() {
        assert!(is_valid_id("BCDF0123456789BCDF0123456789BCDF"));
        assert!(is_valid_id("p1.0123456789abcdef0123456789abcdef"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("POST#p1"));
        assert!(!is_valid_id("with space"));
    }

    #[test]
    fn topics_reject_key_delimiters() {
        assert!(validate_topic("golang").is_ok());
        assert!(validate_topic("rust lang").is_ok());
        assert!(validate_topic("go#lang").is_err());
        assert!(validate_topic(" go").is_err());
        assert!(validate_topic("").is_err());
    }

    #[test]
    fn blank_usernames_are_rejected() {
        assert!(validate_username("alice").is_ok());
        let err = validate_username("   ").unwrap_err();
        assert_eq!(kind_of(&err), Some(ErrorKind::Validation));
    }
}
