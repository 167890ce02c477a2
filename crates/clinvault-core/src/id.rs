use crate::error::{CoreError, Result};

/// Maximum length of a logical id.
pub const MAX_ID_LENGTH: usize = 64;

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validates a logical id: 1-64 characters from `[A-Za-z0-9.-]`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(CoreError::invalid_id(id));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(CoreError::invalid_id(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid() {
        let id = generate_id();
        assert!(validate_id(&id).is_ok());
        assert_ne!(id, generate_id());
    }

    #[test]
    fn test_validate_id_rejects_bad_input() {
        assert!(validate_id("").is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("slash/inside").is_err());
        assert!(validate_id(&"a".repeat(65)).is_err());
        assert!(validate_id("p1").is_ok());
        assert!(validate_id("obs-1.2").is_ok());
    }
}
