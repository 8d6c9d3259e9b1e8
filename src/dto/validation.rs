//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::services::session_code::{is_valid_code, normalize_code};

/// Validates a join code as typed by a participant.
///
/// Surrounding whitespace and lowercase letters are accepted since the code is
/// normalized before lookup.
///
/// # Examples
///
/// ```ignore
/// validate_poll_code("XYZ123")   // Ok
/// validate_poll_code(" xyz123 ") // Ok - normalized to XYZ123
/// validate_poll_code("XY-123")   // Err - invalid character
/// ```
pub fn validate_poll_code(code: &str) -> Result<(), ValidationError> {
    let normalized = normalize_code(code);
    if normalized.is_empty() {
        let mut err = ValidationError::new("poll_code_empty");
        err.message = Some("Poll code must not be empty".into());
        return Err(err);
    }

    if !is_valid_code(&normalized) {
        let mut err = ValidationError::new("poll_code_format");
        err.message = Some("Poll code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_poll_code_valid() {
        assert!(validate_poll_code("XYZ123").is_ok());
        assert!(validate_poll_code("abc999").is_ok());
        assert!(validate_poll_code("  Q1W2E3\t").is_ok());
    }

    #[test]
    fn test_validate_poll_code_invalid() {
        assert!(validate_poll_code("").is_err());
        assert!(validate_poll_code("   ").is_err());
        assert!(validate_poll_code("XY-123").is_err());
        assert!(validate_poll_code("XY 123").is_err()); // inner space
    }
}
