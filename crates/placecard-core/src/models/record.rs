//! Company record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::validate::{self, ReasonCode};

use super::field::{FieldKind, FieldValue};
use super::hours::WeeklySchedule;

/// Stable identifier of a record, taken from the spreadsheet `ID` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Create a record ID, trimming surrounding whitespace.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Record ID cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

/// Optimistic-concurrency token attached to a stored record snapshot.
///
/// Versions only ever grow; a write succeeds only against the version it read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordVersion(u64);

impl RecordVersion {
    /// Version assigned to rows that have never been written by the engine.
    pub const INITIAL: Self = Self(1);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The version a successful write produces.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Default for RecordVersion {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for RecordVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Business category. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PlacesToEat,
    Adventures,
    Services,
}

impl Category {
    pub const ALL: [Self; 3] = [Self::PlacesToEat, Self::Adventures, Self::Services];

    /// Human label, matching the spreadsheet's `type` column values.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PlacesToEat => "Places to eat",
            Self::Adventures => "Adventures",
            Self::Services => "Services",
        }
    }

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::PlacesToEat => "places_to_eat",
            Self::Adventures => "adventures",
            Self::Services => "services",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

macro_rules! canonical_text {
    ($(#[$meta:meta])* $name:ident, $check:path, $reason:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Wrap text that is already in canonical form.
            pub fn from_canonical(value: impl Into<String>) -> std::result::Result<Self, ReasonCode> {
                let value = value.into();
                if $check(&value) {
                    Ok(Self(value))
                } else {
                    Err($reason)
                }
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the wrapped text is still in canonical form.
            #[must_use]
            pub fn is_canonical(&self) -> bool {
                $check(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ReasonCode;

            fn try_from(value: String) -> std::result::Result<Self, ReasonCode> {
                Self::from_canonical(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

canonical_text!(
    /// Phone number in canonical `+<digits>` form.
    PhoneNumber,
    validate::phone::is_canonical,
    ReasonCode::MalformedPhone
);

canonical_text!(
    /// Link to a mapping service.
    MapLink,
    validate::map_link::is_canonical,
    ReasonCode::UnsupportedMapHost
);

canonical_text!(
    /// Messaging handle: `@username` or a canonical phone number.
    MessagingHandle,
    validate::handle::is_canonical,
    ReasonCode::MalformedHandle
);

canonical_text!(
    /// Reference to a photo asset in the file store.
    AssetRef,
    validate::photo::is_valid_reference,
    ReasonCode::MalformedAssetRef
);

impl AssetRef {
    /// Content hash embedded in the reference (`.../<sha256>.<ext>`), if any.
    #[must_use]
    pub fn content_hash(&self) -> Option<&str> {
        let file_name = self.0.rsplit('/').next()?;
        let stem = file_name.split_once('.').map_or(file_name, |(stem, _)| stem);
        (stem.len() == 64 && stem.chars().all(|ch| ch.is_ascii_hexdigit())).then_some(stem)
    }
}

/// One company record as stored in the spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: RecordId,
    pub name: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub photos: Vec<AssetRef>,
    #[serde(default)]
    pub map_link: Option<MapLink>,
    #[serde(default)]
    pub phone: Option<PhoneNumber>,
    #[serde(default)]
    pub messaging: Option<MessagingHandle>,
    #[serde(default)]
    pub hours: Option<WeeklySchedule>,
}

impl CompanyRecord {
    /// Create a record with only the required fields set.
    pub fn new(id: RecordId, name: impl Into<String>) -> Result<Self> {
        let name = validate::name::normalize(&name.into())?;
        Ok(Self {
            id,
            name,
            category: None,
            photos: Vec::new(),
            map_link: None,
            phone: None,
            messaging: None,
            hours: None,
        })
    }

    /// Current value of one field.
    #[must_use]
    pub fn get(&self, kind: FieldKind) -> FieldValue {
        match kind {
            FieldKind::Name => FieldValue::Name(self.name.clone()),
            FieldKind::Category => FieldValue::Category(self.category),
            FieldKind::Photos => FieldValue::Photos(self.photos.clone()),
            FieldKind::MapLink => FieldValue::MapLink(self.map_link.clone()),
            FieldKind::Phone => FieldValue::Phone(self.phone.clone()),
            FieldKind::Messaging => FieldValue::Messaging(self.messaging.clone()),
            FieldKind::Hours => FieldValue::Hours(self.hours.clone()),
        }
    }

    pub(crate) fn set(&mut self, value: FieldValue) {
        match value {
            FieldValue::Name(name) => self.name = name,
            FieldValue::Category(category) => self.category = category,
            FieldValue::Photos(photos) => self.photos = photos,
            FieldValue::MapLink(link) => self.map_link = link,
            FieldValue::Phone(phone) => self.phone = phone,
            FieldValue::Messaging(handle) => self.messaging = handle,
            FieldValue::Hours(hours) => self.hours = hours,
        }
    }

    /// Check every present field against its validator.
    pub fn check(&self) -> Result<()> {
        for kind in FieldKind::ALL {
            self.get(kind)
                .revalidate()
                .map_err(|reason| Error::InvalidField {
                    field: kind,
                    reason,
                })?;
        }
        Ok(())
    }

    /// Fields still left blank, in catalog order.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<FieldKind> {
        FieldKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_blank())
            .collect()
    }

    /// Whether `query` names this record, ignoring case and spacing.
    #[must_use]
    pub fn name_matches(&self, query: &str) -> bool {
        validate::name::normalize(query)
            .is_ok_and(|query| query.to_lowercase() == self.name.to_lowercase())
    }

    /// Multi-line card shown to operators.
    #[must_use]
    pub fn render_card(&self) -> String {
        let mut lines = vec![format!("ID: {}", self.id)];
        lines.extend(
            FieldKind::ALL
                .iter()
                .map(|kind| format!("{}: {}", kind.label(), self.get(*kind).render())),
        );
        lines.join("\n")
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub record: CompanyRecord,
    pub version: RecordVersion,
}

impl Snapshot {
    #[must_use]
    pub const fn new(record: CompanyRecord, version: RecordVersion) -> Self {
        Self { record, version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CompanyRecord {
        CompanyRecord::new(RecordId::new("№310").unwrap(), "Casa Verde").unwrap()
    }

    #[test]
    fn test_record_id_trims_and_rejects_empty() {
        assert_eq!(RecordId::new("  №310 ").unwrap().as_str(), "№310");
        assert!(RecordId::new("   ").is_err());
        assert!("".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_version_next_is_monotonic() {
        let version = RecordVersion::INITIAL;
        assert!(version.next() > version);
        assert_eq!(version.next().get(), 2);
        assert_eq!(version.to_string(), "v1");
    }

    #[test]
    fn test_record_new_requires_name() {
        assert!(CompanyRecord::new(RecordId::new("1").unwrap(), "  ").is_err());
        assert_eq!(record().name, "Casa Verde");
    }

    #[test]
    fn test_get_and_set_round_trip() {
        let mut record = record();
        let phone = PhoneNumber::from_canonical("+50688887777").unwrap();
        record.set(FieldValue::Phone(Some(phone.clone())));
        assert_eq!(record.get(FieldKind::Phone), FieldValue::Phone(Some(phone)));
        assert!(record.check().is_ok());
    }

    #[test]
    fn test_canonical_types_reject_raw_text_on_deserialize() {
        let json = r#"{"id":"1","name":"Casa","phone":"8888 7777"}"#;
        assert!(serde_json::from_str::<CompanyRecord>(json).is_err());

        let json = r#"{"id":"1","name":"Casa","phone":"+50688887777"}"#;
        let parsed: CompanyRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.phone.unwrap().as_str(), "+50688887777");
    }

    #[test]
    fn test_asset_ref_content_hash() {
        let hash = "a".repeat(64);
        let asset = AssetRef::from_canonical(format!("photos/{hash}.png")).unwrap();
        assert_eq!(asset.content_hash(), Some(hash.as_str()));

        let other = AssetRef::from_canonical("drive/folder/abc").unwrap();
        assert_eq!(other.content_hash(), None);
    }

    #[test]
    fn test_missing_fields_lists_blank_optionals() {
        let mut record = record();
        assert_eq!(record.missing_fields(), &FieldKind::ALL[1..]);

        record.phone = Some(PhoneNumber::from_canonical("+50688887777").unwrap());
        record.category = Some(Category::Services);
        assert_eq!(
            record.missing_fields(),
            vec![
                FieldKind::Photos,
                FieldKind::MapLink,
                FieldKind::Messaging,
                FieldKind::Hours
            ]
        );
    }

    #[test]
    fn test_name_matches_ignores_case_and_spacing() {
        let record = record();
        assert!(record.name_matches("casa verde"));
        assert!(record.name_matches("  CASA   Verde "));
        assert!(!record.name_matches("Casa"));
        assert!(!record.name_matches("   "));
    }

    #[test]
    fn test_render_card_lists_every_field() {
        let card = record().render_card();
        assert!(card.starts_with("ID: №310"));
        for kind in FieldKind::ALL {
            assert!(card.contains(kind.label()));
        }
    }
}
