//! Validation for user-chosen names (batches, windows, constraints, sources).
//!
//! Names appear in URLs and in expressions, so the rules are strict:
//! non-empty, bounded length, no surrounding whitespace, no path separators
//! and no control characters.

use crate::IdError;

/// Maximum length of a name in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Check that `name` is a valid identifier.
pub fn validate_name(name: &str) -> Result<(), IdError> {
    if name.is_empty() {
        return Err(IdError::Empty { kind: "name" });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(IdError::NameTooLong {
            name: name.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    if name.trim() != name {
        return Err(IdError::InvalidName {
            name: name.to_string(),
            message: "leading or trailing whitespace".to_string(),
        });
    }

    if name == "." || name == ".." {
        return Err(IdError::InvalidName {
            name: name.to_string(),
            message: "reserved name".to_string(),
        });
    }

    if let Some(found) = name.chars().find(|c| *c == '/' || c.is_control()) {
        return Err(IdError::InvalidCharacter {
            name: name.to_string(),
            found,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["w1", "batch 1", "east-dc.wave_2", "ünïcode"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_name("").unwrap_err().is_empty());
        assert!(matches!(
            validate_name("a/b"),
            Err(IdError::InvalidCharacter { found: '/', .. })
        ));
        assert!(matches!(
            validate_name("tab\there"),
            Err(IdError::InvalidCharacter { .. })
        ));
        assert!(matches!(validate_name(" w1"), Err(IdError::InvalidName { .. })));
        assert!(matches!(validate_name(".."), Err(IdError::InvalidName { .. })));
        assert!(matches!(
            validate_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(IdError::NameTooLong { .. })
        ));
    }
}
