//! Data models for placecard

mod field;
mod hours;
mod operator;
mod patch;
mod record;

pub use field::{FieldKind, FieldSpec, FieldValue, InputKind, FIELD_CATALOG};
pub use hours::{DaySchedule, Interval, WeeklySchedule};
pub use operator::{Operator, OperatorId, Permissions};
pub use patch::{apply, diff, FieldChanges, Patch};
pub use record::{
    AssetRef, Category, CompanyRecord, MapLink, MessagingHandle, PhoneNumber, RecordId,
    RecordVersion, Snapshot,
};
