//! Messaging handle validation

use super::{phone, PhoneRules, ReasonCode, ValidationError};

const USERNAME_CHARS: std::ops::RangeInclusive<usize> = 5..=32;

/// Normalize a messaging handle to `@username` or a canonical phone number.
///
/// Accepts `@username`, `wa.me/<digits>` links (with or without scheme) and
/// anything the phone validator accepts.
pub fn normalize(raw: &str, rules: &PhoneRules) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let malformed = || ValidationError::new(ReasonCode::MalformedHandle, trimmed);

    if trimmed.starts_with('@') {
        return if is_username(trimmed) {
            Ok(trimmed.to_string())
        } else {
            Err(malformed())
        };
    }

    if let Some(digits) = wa_me_digits(trimmed) {
        let canonical = format!("+{digits}");
        return if phone::is_canonical(&canonical) {
            Ok(canonical)
        } else {
            Err(malformed())
        };
    }

    phone::normalize(trimmed, rules).map_err(|_| malformed())
}

/// Whether `value` is an already-normalized handle.
#[must_use]
pub fn is_canonical(value: &str) -> bool {
    is_username(value) || phone::is_canonical(value)
}

fn is_username(value: &str) -> bool {
    let Some(name) = value.strip_prefix('@') else {
        return false;
    };
    USERNAME_CHARS.contains(&name.chars().count())
        && name.starts_with(|ch: char| ch.is_ascii_alphabetic())
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn wa_me_digits(value: &str) -> Option<&str> {
    let without_scheme = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value);
    let digits = without_scheme.strip_prefix("wa.me/")?.trim_end_matches('/');
    (!digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit())).then_some(digits)
}
