//! Change sets and the pure apply/diff operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::field::{FieldKind, FieldValue};
use super::operator::OperatorId;
use super::record::{CompanyRecord, RecordId, RecordVersion, Snapshot};

/// Sparse set of field changes, at most one value per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FieldValue>", into = "Vec<FieldValue>")]
pub struct FieldChanges(BTreeMap<FieldKind, FieldValue>);

impl FieldChanges {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a value, replacing any earlier value for the same field.
    pub fn insert(&mut self, value: FieldValue) -> Option<FieldValue> {
        self.0.insert(value.kind(), value)
    }

    pub fn remove(&mut self, kind: FieldKind) -> Option<FieldValue> {
        self.0.remove(&kind)
    }

    #[must_use]
    pub fn get(&self, kind: FieldKind) -> Option<&FieldValue> {
        self.0.get(&kind)
    }

    #[must_use]
    pub fn contains(&self, kind: FieldKind) -> bool {
        self.0.contains_key(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Changed fields in catalog order.
    pub fn fields(&self) -> impl Iterator<Item = FieldKind> + '_ {
        self.0.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &FieldValue> {
        self.0.values()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&FieldValue) -> bool) {
        self.0.retain(|_, value| keep(value));
    }
}

impl From<Vec<FieldValue>> for FieldChanges {
    fn from(values: Vec<FieldValue>) -> Self {
        let mut changes = Self::new();
        for value in values {
            changes.insert(value);
        }
        changes
    }
}

impl From<FieldChanges> for Vec<FieldValue> {
    fn from(changes: FieldChanges) -> Self {
        changes.0.into_values().collect()
    }
}

impl FromIterator<FieldValue> for FieldChanges {
    fn from_iter<I: IntoIterator<Item = FieldValue>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

/// Overlay `changes` on `record`, producing a new record.
///
/// Every value is re-validated, so a change set is safe to apply no matter
/// where it came from.
pub fn apply(record: &CompanyRecord, changes: &FieldChanges) -> Result<CompanyRecord> {
    let mut next = record.clone();
    for value in changes.values() {
        value.revalidate().map_err(|reason| Error::InvalidField {
            field: value.kind(),
            reason,
        })?;
        next.set(value.clone());
    }
    Ok(next)
}

/// Minimal change set turning `a` into `b`.
#[must_use]
pub fn diff(a: &CompanyRecord, b: &CompanyRecord) -> FieldChanges {
    FieldKind::ALL
        .iter()
        .map(|kind| b.get(*kind))
        .filter(|value| a.get(value.kind()) != *value)
        .collect()
}

/// A confirmed change set bound to the snapshot it was computed against.
///
/// Built once at confirmation time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    base: Snapshot,
    changes: FieldChanges,
    operator: OperatorId,
    created_at: DateTime<Utc>,
}

impl Patch {
    pub fn new(
        base: Snapshot,
        changes: FieldChanges,
        operator: OperatorId,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if changes.is_empty() {
            return Err(Error::InvalidInput(
                "Patch must change at least one field".to_string(),
            ));
        }
        Ok(Self {
            base,
            changes,
            operator,
            created_at,
        })
    }

    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        &self.base.record.id
    }

    #[must_use]
    pub const fn base_version(&self) -> RecordVersion {
        self.base.version
    }

    /// The record as the operator first saw it.
    #[must_use]
    pub const fn base(&self) -> &CompanyRecord {
        &self.base.record
    }

    #[must_use]
    pub const fn changes(&self) -> &FieldChanges {
        &self.changes
    }

    #[must_use]
    pub const fn operator(&self) -> OperatorId {
        self.operator
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
