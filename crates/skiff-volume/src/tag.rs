//! Tag validation.
//!
//! Tags share a lookup namespace with uuids, so a tag that parses as a
//! uuid is refused.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use skiff_core::{Error, Result};

const MAX_TAG_LEN: usize = 64;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("tag pattern"))
}

/// Check that `tag` is well formed, returning it unchanged.
pub fn validate_tag(tag: &str) -> Result<&str> {
    if tag.is_empty() {
        return Err(Error::Validation("tag cannot be empty".to_string()));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(Error::Validation(format!(
            "tag '{tag}' is longer than {MAX_TAG_LEN} characters"
        )));
    }
    if !tag_pattern().is_match(tag) {
        return Err(Error::Validation(format!(
            "tag '{tag}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'"
        )));
    }
    if Uuid::parse_str(tag).is_ok() {
        return Err(Error::Validation(format!("tag '{tag}' cannot be a uuid")));
    }
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_tags() {
        for tag in ["db", "web-1", "cache_v2", "site.example", "A1"] {
            assert_eq!(validate_tag(tag).unwrap(), tag);
        }
    }

    #[test]
    fn rejects_malformed_tags() {
        for tag in ["", "-db", ".hidden", "has space", "a/b", "x:y"] {
            assert!(
                matches!(validate_tag(tag), Err(Error::Validation(_))),
                "'{tag}' should be rejected"
            );
        }
    }

    #[test]
    fn rejects_overlong_tag() {
        let tag = "a".repeat(MAX_TAG_LEN + 1);
        assert!(validate_tag(&tag).is_err());
        assert!(validate_tag(&tag[..MAX_TAG_LEN]).is_ok());
    }

    #[test]
    fn rejects_uuid_shaped_tag() {
        let tag = Uuid::new_v4().to_string();
        assert!(matches!(validate_tag(&tag), Err(Error::Validation(_))));
    }
}
