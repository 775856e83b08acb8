//! Field validators
//!
//! Every validator is a pure function from operator input to a typed
//! [`FieldValue`] in canonical form, or a [`ValidationError`] carrying a
//! stable reason code the operator can act on.

pub mod handle;
pub mod hours;
pub mod map_link;
pub mod name;
pub mod phone;
pub mod photo;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Category, FieldKind, FieldValue, MapLink, MessagingHandle, PhoneNumber};

pub use photo::{detect_format, PhotoFormat};

/// Marker operators send to clear an optional field.
pub const CLEAR_MARKER: &str = "-";

/// Why an input was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    EmptyName,
    NameTooLong,
    UnknownCategory,
    MalformedPhone,
    MalformedMapLink,
    UnsupportedMapHost,
    MalformedHandle,
    MalformedHours,
    OverlappingHours,
    CloseBeforeOpen,
    EmptyPhoto,
    UnsupportedFormat,
    MalformedAssetRef,
    BinaryRequired,
    TextRequired,
}

impl ReasonCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyName => "empty_name",
            Self::NameTooLong => "name_too_long",
            Self::UnknownCategory => "unknown_category",
            Self::MalformedPhone => "malformed_phone",
            Self::MalformedMapLink => "malformed_map_link",
            Self::UnsupportedMapHost => "unsupported_map_host",
            Self::MalformedHandle => "malformed_handle",
            Self::MalformedHours => "malformed_hours",
            Self::OverlappingHours => "overlapping_hours",
            Self::CloseBeforeOpen => "close_before_open",
            Self::EmptyPhoto => "empty_photo",
            Self::UnsupportedFormat => "unsupported_format",
            Self::MalformedAssetRef => "malformed_asset_ref",
            Self::BinaryRequired => "binary_required",
            Self::TextRequired => "text_required",
        }
    }

    /// Short correction hint shown next to the code.
    #[must_use]
    pub const fn hint(self) -> &'static str {
        match self {
            Self::EmptyName => "The name cannot be empty.",
            Self::NameTooLong => "The name is too long.",
            Self::UnknownCategory => "Pick one of: Places to eat, Adventures, Services.",
            Self::MalformedPhone => "Send a phone number like 8888 7777 or +506 8888 7777.",
            Self::MalformedMapLink => "Send a full https:// link.",
            Self::UnsupportedMapHost => "Send a Google Maps or Waze link.",
            Self::MalformedHandle => "Send @username, a wa.me link or a phone number.",
            Self::MalformedHours => "Use e.g. `Mon-Fri 09:00-18:00; Sat 10:00-14:00; Sun closed`.",
            Self::OverlappingHours => "Two intervals on the same day overlap.",
            Self::CloseBeforeOpen => "Closing time must be after opening time.",
            Self::EmptyPhoto => "The photo is empty.",
            Self::UnsupportedFormat => "Send a JPEG, PNG or WebP image.",
            Self::MalformedAssetRef => "Photo references cannot be empty or contain spaces.",
            Self::BinaryRequired => "This field expects a photo.",
            Self::TextRequired => "This field expects text.",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-correctable validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct ValidationError {
    pub reason: ReasonCode,
    pub detail: String,
}

impl ValidationError {
    pub fn new(reason: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.reason.as_str()
    }
}

impl From<ReasonCode> for ValidationError {
    fn from(reason: ReasonCode) -> Self {
        Self::new(reason, reason.hint())
    }
}

/// Deployment rules for phone normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhoneRules {
    /// Country code prefixed to national numbers, without `+`.
    pub default_country_code: String,
    /// Digit count of a national number.
    pub national_number_len: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            default_country_code: "506".to_string(),
            national_number_len: 8,
        }
    }
}

/// Deployment-configurable validation rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationRules {
    pub phone: PhoneRules,
}

/// Validate operator text for `kind`, returning the canonical value.
///
/// Optional fields are cleared with `-`. Photos take a comma-separated list
/// of asset references here; attachments go through [`validate_photo`].
pub fn validate(
    kind: FieldKind,
    input: &str,
    rules: &ValidationRules,
) -> Result<FieldValue, ValidationError> {
    let input = input.trim();
    if input == CLEAR_MARKER && kind.spec().optional {
        return Ok(clear(kind));
    }

    let value = match kind {
        FieldKind::Name => FieldValue::Name(name::normalize(input)?),
        FieldKind::Category => FieldValue::Category(Some(parse_category(input)?)),
        FieldKind::Photos => FieldValue::Photos(photo::parse_references(input)?),
        FieldKind::MapLink => {
            let link = map_link::normalize(input)?;
            FieldValue::MapLink(Some(MapLink::from_canonical(link)?))
        }
        FieldKind::Phone => {
            let phone = phone::normalize(input, &rules.phone)?;
            FieldValue::Phone(Some(PhoneNumber::from_canonical(phone)?))
        }
        FieldKind::Messaging => {
            let handle = handle::normalize(input, &rules.phone)?;
            FieldValue::Messaging(Some(MessagingHandle::from_canonical(handle)?))
        }
        FieldKind::Hours => FieldValue::Hours(Some(hours::parse(input)?)),
    };
    Ok(value)
}

/// Validate an attachment, returning its detected format.
pub fn validate_photo(bytes: &[u8]) -> Result<PhotoFormat, ValidationError> {
    if bytes.is_empty() {
        return Err(ReasonCode::EmptyPhoto.into());
    }
    detect_format(bytes).ok_or_else(|| ReasonCode::UnsupportedFormat.into())
}

/// Resolve a category from its label or key, case-insensitively.
pub fn parse_category(input: &str) -> Result<Category, ValidationError> {
    let wanted = input.trim();
    Category::ALL
        .into_iter()
        .find(|category| {
            category.label().eq_ignore_ascii_case(wanted)
                || category.key().eq_ignore_ascii_case(wanted)
        })
        .ok_or_else(|| ValidationError::new(ReasonCode::UnknownCategory, wanted))
}

const fn clear(kind: FieldKind) -> FieldValue {
    match kind {
        FieldKind::Name => FieldValue::Name(String::new()),
        FieldKind::Category => FieldValue::Category(None),
        FieldKind::Photos => FieldValue::Photos(Vec::new()),
        FieldKind::MapLink => FieldValue::MapLink(None),
        FieldKind::Phone => FieldValue::Phone(None),
        FieldKind::Messaging => FieldValue::Messaging(None),
        FieldKind::Hours => FieldValue::Hours(None),
    }
}
