//! Local-name grammar and element name generation.

use crate::error::InstantiationError;

/// `[A-Za-z][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `e<digits>`, the pattern generated for elements.
pub fn is_element_name(name: &str) -> bool {
    name.strip_prefix('e')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Validate a user-supplied local name.
pub fn validate_local_name(name: &str) -> Result<(), InstantiationError> {
    if !is_identifier(name) {
        return Err(InstantiationError::MalformedName {
            name: name.to_string(),
        });
    }
    if is_element_name(name) {
        return Err(InstantiationError::ReservedName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// First `e<n>` (n from 1) for which `taken` is false.
pub fn next_element_name(taken: impl Fn(&str) -> bool) -> String {
    (1u64..)
        .map(|n| format!("e{n}"))
        .find(|name| !taken(name))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_grammar() {
        assert!(is_identifier("b5"));
        assert!(is_identifier("Shelf_2"));
        assert!(!is_identifier("5b"));
        assert!(!is_identifier("_x"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a.b"));
    }

    #[test]
    fn element_names_are_reserved() {
        assert!(matches!(
            validate_local_name("e12"),
            Err(InstantiationError::ReservedName { .. })
        ));
        assert!(validate_local_name("e").is_ok());
        assert!(validate_local_name("e1x").is_ok());
        assert!(validate_local_name("env").is_ok());
        assert!(matches!(
            validate_local_name("1e"),
            Err(InstantiationError::MalformedName { .. })
        ));
    }

    #[test]
    fn element_names_fill_gaps() {
        let taken = ["e1", "e3"];
        assert_eq!(next_element_name(|n| taken.contains(&n)), "e2");
        assert_eq!(next_element_name(|_| false), "e1");
    }
}
