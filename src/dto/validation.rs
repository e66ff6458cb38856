//! Validation helpers for DTOs.

use uuid::Uuid;
use validator::ValidationError;

/// Longest accepted user identifier, in characters.
pub const MAX_USER_ID_LENGTH: usize = 50;

/// Validates that a user ID is non-blank and at most [`MAX_USER_ID_LENGTH`] characters.
pub fn validate_user_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        let mut err = ValidationError::new("user_id_empty");
        err.message = Some("userId must not be empty".into());
        return Err(err);
    }

    let length = id.chars().count();
    if length > MAX_USER_ID_LENGTH {
        let mut err = ValidationError::new("user_id_length");
        err.message = Some(
            format!("userId must be at most {MAX_USER_ID_LENGTH} characters (got {length})").into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a teamspace ID is a hyphenated lowercase UUID.
///
/// ```ignore
/// validate_teamspace_id("9b2f6c1e-3d4a-4f5b-8c7d-0e1f2a3b4c5d") // Ok
/// validate_teamspace_id("9B2F6C1E-3D4A-4F5B-8C7D-0E1F2A3B4C5D") // Err - uppercase
/// ```
pub fn validate_teamspace_id(id: &str) -> Result<(), ValidationError> {
    match Uuid::parse_str(id) {
        Ok(parsed) if parsed.hyphenated().to_string() == id => Ok(()),
        _ => {
            let mut err = ValidationError::new("teamspace_id_format");
            err.message = Some("teamspaceId must be a lowercase hyphenated UUID".into());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_user_id_valid() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id(&"x".repeat(50)).is_ok());
        assert!(validate_user_id(&"é".repeat(50)).is_ok());
    }

    #[test]
    fn test_validate_user_id_invalid() {
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("   ").is_err());
        assert!(validate_user_id(&"x".repeat(51)).is_err());
    }

    #[test]
    fn test_validate_teamspace_id() {
        let id = Uuid::new_v4().to_string();
        assert!(validate_teamspace_id(&id).is_ok());
        assert!(validate_teamspace_id(&id.to_uppercase()).is_err());
        assert!(validate_teamspace_id(&id.replace('-', "")).is_err());
        assert!(validate_teamspace_id("not-a-uuid").is_err());
    }
}
