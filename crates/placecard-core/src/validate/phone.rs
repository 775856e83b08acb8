//! Phone number normalization

use super::{PhoneRules, ReasonCode, ValidationError};

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// Normalize a phone number to `+<digits>`.
///
/// Spacing and punctuation are dropped; `+` and `00` mark international
/// numbers, bare national numbers get the default country code.
pub fn normalize(raw: &str, rules: &PhoneRules) -> Result<String, ValidationError> {
    let malformed = || ValidationError::new(ReasonCode::MalformedPhone, raw.trim());

    let trimmed = raw.trim();
    let (international, rest) = trimmed
        .strip_prefix('+')
        .map_or((false, trimmed), |rest| (true, rest));

    let mut digits = String::with_capacity(rest.len());
    for ch in rest.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ' ' | '-' | '.' | '(' | ')' | '/' | '\u{a0}' => {}
            _ => return Err(malformed()),
        }
    }

    let digits = if international {
        digits
    } else if let Some(stripped) = digits.strip_prefix("00") {
        stripped.to_string()
    } else if digits.len() == rules.national_number_len {
        format!("{}{digits}", rules.default_country_code)
    } else if digits.starts_with(&rules.default_country_code)
        && digits.len() == rules.default_country_code.len() + rules.national_number_len
    {
        digits
    } else {
        return Err(malformed());
    };

    let canonical = format!("+{digits}");
    if is_canonical(&canonical) {
        Ok(canonical)
    } else {
        Err(malformed())
    }
}

/// Whether `value` is `+` followed by 8 to 15 digits, no leading zero.
#[must_use]
pub fn is_canonical(value: &str) -> bool {
    value.strip_prefix('+').is_some_and(|digits| {
        (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len())
            && !digits.starts_with('0')
            && digits.bytes().all(|byte| byte.is_ascii_digit())
    })
}
