//! Company name validation

use super::{ReasonCode, ValidationError};

pub const MAX_NAME_CHARS: usize = 120;

/// Trim a name and check its length.
pub fn normalize(raw: &str) -> Result<String, ValidationError> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(ReasonCode::EmptyName.into());
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ValidationError::new(
            ReasonCode::NameTooLong,
            format!("at most {MAX_NAME_CHARS} characters"),
        ));
    }
    Ok(name)
}
