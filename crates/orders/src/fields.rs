//! Column-level checks for text fields.
//!
//! Lengths are counted in characters, matching `varchar(n)` semantics.

use checkout_core::{DomainError, DomainResult};

/// A required text column: non-blank and at most `max` characters.
pub fn required(field: &str, value: &str, max: usize) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} is required")));
    }
    max_len(field, value, max)
}

/// An optional text column. Blank values collapse to `None`.
pub fn optional(field: &str, value: Option<String>, max: usize) -> DomainResult<Option<String>> {
    match value {
        Some(v) if !v.trim().is_empty() => {
            max_len(field, &v, max)?;
            Ok(Some(v))
        }
        _ => Ok(None),
    }
}

pub fn max_len(field: &str, value: &str, max: usize) -> DomainResult<()> {
    let len = value.chars().count();
    if len > max {
        return Err(DomainError::validation(format!(
            "{field} must be at most {max} characters (got {len})"
        )));
    }
    Ok(())
}

/// Loose shape check: `local@domain.tld`, no whitespace.
pub fn email(field: &str, value: &str, max: usize) -> DomainResult<()> {
    required(field, value, max)?;

    let malformed = || DomainError::validation(format!("{field} is not a valid email address"));
    if value.chars().any(char::is_whitespace) {
        return Err(malformed());
    }
    let (local, domain) = value.rsplit_once('@').ok_or_else(malformed)?;
    if local.is_empty() || local.contains('@') {
        return Err(malformed());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(malformed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_rejects_blank() {
        assert!(required("full_name", "   ", 50).is_err());
        assert!(required("full_name", "Ada Lovelace", 50).is_ok());
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        // 40 two-byte characters fit a 40-character column.
        let city = "é".repeat(40);
        assert!(required("town_or_city", &city, 40).is_ok());
        assert!(required("town_or_city", &format!("{city}x"), 40).is_err());
    }

    #[test]
    fn optional_collapses_blank_to_none() {
        assert_eq!(optional("county", Some("  ".into()), 80).unwrap(), None);
        assert_eq!(optional("county", None, 80).unwrap(), None);
        assert_eq!(
            optional("county", Some("Kerry".into()), 80).unwrap(),
            Some("Kerry".to_string())
        );
    }

    #[test]
    fn email_shape() {
        assert!(email("email", "ada@example.com", 254).is_ok());
        assert!(email("email", "ada.lovelace+tours@mail.example.co.uk", 254).is_ok());
        for bad in [
            "ada",
            "@example.com",
            "ada@",
            "ada@example",
            "ada@@example.com",
            "a da@example.com",
            "ada@example..com",
        ] {
            assert!(email("email", bad, 254).is_err(), "{bad} should be rejected");
        }
    }
}
