//! Photo attachment and reference checks

use image::ImageFormat;

use crate::models::AssetRef;

use super::ValidationError;

/// Accepted photo formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhotoFormat {
    Jpeg,
    Png,
    WebP,
}

impl PhotoFormat {
    pub const ALL: [Self; 3] = [Self::Jpeg, Self::Png, Self::WebP];

    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.content_type().eq_ignore_ascii_case(content_type.trim()))
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

/// Detect the format from magic bytes.
#[must_use]
pub fn detect_format(bytes: &[u8]) -> Option<PhotoFormat> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => Some(PhotoFormat::Jpeg),
        ImageFormat::Png => Some(PhotoFormat::Png),
        ImageFormat::WebP => Some(PhotoFormat::WebP),
        _ => None,
    }
}

/// A stored reference is non-empty and free of whitespace and commas.
#[must_use]
pub fn is_valid_reference(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(|ch| ch.is_whitespace() || ch == ',')
}

/// Parse a comma-separated list of references, as stored in the `photos`
/// spreadsheet column.
pub fn parse_references(raw: &str) -> Result<Vec<AssetRef>, ValidationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            AssetRef::from_canonical(part)
                .map_err(|reason| ValidationError::new(reason, part.to_string()))
        })
        .collect()
}
