//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::dao::tree::path::validate_key;

/// Validates that a text field holds something other than whitespace.
pub fn validate_non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Value must not be empty".into());
        return Err(err);
    }
    Ok(())
}

/// Validates that an identifier can be used as a single key of the shared tree.
///
/// # Examples
///
/// ```ignore
/// validate_record_key("0190f3c2a1b7")   // Ok
/// validate_record_key("abc/def")        // Err - would address a nested node
/// validate_record_key("")               // Err - empty
/// ```
pub fn validate_record_key(value: &str) -> Result<(), ValidationError> {
    validate_key(value).map_err(|reason| {
        let mut err = ValidationError::new("record_key");
        err.message = Some(format!("Identifier is not usable: {reason}").into());
        err
    })
}
