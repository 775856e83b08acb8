//! Editable field catalog and typed field values

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::validate::{self, ReasonCode};

use super::hours::WeeklySchedule;
use super::record::{AssetRef, Category, MapLink, MessagingHandle, PhoneNumber};

/// The fixed set of editable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Name,
    Category,
    Photos,
    MapLink,
    Phone,
    Messaging,
    Hours,
}

/// What kind of operator input a field expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Free text, validated and normalized.
    Text,
    /// One of a fixed list of choices.
    Choice,
    /// Binary attachments.
    Binary,
}

/// Static description of an editable field. Menus and prompts are rendered
/// from this table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub key: &'static str,
    pub label: &'static str,
    pub input: InputKind,
    /// Whether the field may be cleared with `-`.
    pub optional: bool,
    pub prompt: &'static str,
    /// Extra names accepted when an operator picks the field by text.
    pub aliases: &'static [&'static str],
}

pub const FIELD_CATALOG: [FieldSpec; 7] = [
    FieldSpec {
        kind: FieldKind::Name,
        key: "name",
        label: "Name",
        input: InputKind::Text,
        optional: false,
        prompt: "Enter the new company name.",
        aliases: &[],
    },
    FieldSpec {
        kind: FieldKind::Category,
        key: "category",
        label: "Type",
        input: InputKind::Choice,
        optional: true,
        prompt: "Choose a type:",
        aliases: &["type"],
    },
    FieldSpec {
        kind: FieldKind::Photos,
        key: "photos",
        label: "Photos",
        input: InputKind::Binary,
        optional: true,
        prompt: "Send a photo (JPEG, PNG or WebP), or type `remove N` to drop photo N.",
        aliases: &["photo"],
    },
    FieldSpec {
        kind: FieldKind::MapLink,
        key: "map_link",
        label: "Google map",
        input: InputKind::Text,
        optional: true,
        prompt: "Send a map link, e.g. https://maps.app.goo.gl/{LocationID}.",
        aliases: &["google_map", "map"],
    },
    FieldSpec {
        kind: FieldKind::Phone,
        key: "phone",
        label: "Phone numbers",
        input: InputKind::Text,
        optional: true,
        prompt: "Enter the phone number.",
        aliases: &["phone_numbers", "phone_number"],
    },
    FieldSpec {
        kind: FieldKind::Messaging,
        key: "messaging",
        label: "WhatsApp",
        input: InputKind::Text,
        optional: true,
        prompt: "Enter the WhatsApp number, a wa.me link, or an @handle.",
        aliases: &["whatsapp", "handle"],
    },
    FieldSpec {
        kind: FieldKind::Hours,
        key: "hours",
        label: "Hours of operation",
        input: InputKind::Text,
        optional: true,
        prompt: "Enter opening hours, e.g. `Mon-Fri 09:00-18:00; Sat 10:00-14:00; Sun closed`.",
        aliases: &["hours_of_operation", "opening_hours"],
    },
];

impl FieldKind {
    pub const ALL: [Self; 7] = [
        Self::Name,
        Self::Category,
        Self::Photos,
        Self::MapLink,
        Self::Phone,
        Self::Messaging,
        Self::Hours,
    ];

    #[must_use]
    pub fn spec(self) -> &'static FieldSpec {
        FIELD_CATALOG
            .iter()
            .find(|spec| spec.kind == self)
            .unwrap_or(&FIELD_CATALOG[0])
    }

    #[must_use]
    pub fn key(self) -> &'static str {
        self.spec().key
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        self.spec().label
    }

    /// Resolve a field from its key, label or alias (case-insensitive).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let wanted = name.trim();
        FIELD_CATALOG
            .iter()
            .find(|spec| {
                spec.key.eq_ignore_ascii_case(wanted)
                    || spec.label.eq_ignore_ascii_case(wanted)
                    || spec
                        .aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(wanted))
            })
            .map(|spec| spec.kind)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A typed value for one field. Optional fields carry `None` when cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Name(String),
    Category(Option<Category>),
    Photos(Vec<AssetRef>),
    MapLink(Option<MapLink>),
    Phone(Option<PhoneNumber>),
    Messaging(Option<MessagingHandle>),
    Hours(Option<WeeklySchedule>),
}

impl FieldValue {
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Name(_) => FieldKind::Name,
            Self::Category(_) => FieldKind::Category,
            Self::Photos(_) => FieldKind::Photos,
            Self::MapLink(_) => FieldKind::MapLink,
            Self::Phone(_) => FieldKind::Phone,
            Self::Messaging(_) => FieldKind::Messaging,
            Self::Hours(_) => FieldKind::Hours,
        }
    }

    /// Whether the field holds nothing yet.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Name(name) => name.is_empty(),
            Self::Category(category) => category.is_none(),
            Self::Photos(photos) => photos.is_empty(),
            Self::MapLink(link) => link.is_none(),
            Self::Phone(phone) => phone.is_none(),
            Self::Messaging(handle) => handle.is_none(),
            Self::Hours(hours) => hours.is_none(),
        }
    }

    /// Text shown to operators.
    #[must_use]
    pub fn render(&self) -> String {
        fn or_dash<T: fmt::Display>(value: Option<&T>) -> String {
            value.map_or_else(|| "-".to_string(), ToString::to_string)
        }

        match self {
            Self::Name(name) => name.clone(),
            Self::Category(category) => or_dash(category.as_ref()),
            Self::Photos(photos) if photos.is_empty() => "-".to_string(),
            Self::Photos(photos) => photos
                .iter()
                .map(AssetRef::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            Self::MapLink(link) => or_dash(link.as_ref()),
            Self::Phone(phone) => or_dash(phone.as_ref()),
            Self::Messaging(handle) => or_dash(handle.as_ref()),
            Self::Hours(hours) => or_dash(hours.as_ref()),
        }
    }

    /// Re-check the value's canonical form.
    pub fn revalidate(&self) -> Result<(), ReasonCode> {
        fn check<T>(
            value: Option<&T>,
            ok: impl Fn(&T) -> bool,
            reason: ReasonCode,
        ) -> Result<(), ReasonCode> {
            match value {
                Some(value) if !ok(value) => Err(reason),
                _ => Ok(()),
            }
        }

        match self {
            Self::Name(name) => validate::name::normalize(name)
                .map(|_| ())
                .map_err(|error| error.reason),
            Self::Category(_) => Ok(()),
            Self::Photos(photos) => photos
                .iter()
                .all(AssetRef::is_canonical)
                .then_some(())
                .ok_or(ReasonCode::MalformedAssetRef),
            Self::MapLink(link) => check(
                link.as_ref(),
                MapLink::is_canonical,
                ReasonCode::UnsupportedMapHost,
            ),
            Self::Phone(phone) => check(
                phone.as_ref(),
                PhoneNumber::is_canonical,
                ReasonCode::MalformedPhone,
            ),
            Self::Messaging(handle) => check(
                handle.as_ref(),
                MessagingHandle::is_canonical,
                ReasonCode::MalformedHandle,
            ),
            Self::Hours(Some(hours)) => hours.check(),
            Self::Hours(None) => Ok(()),
        }
    }
}
