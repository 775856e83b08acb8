//! Operator identity and permissions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::record::RecordId;

/// Identity of an operator as resolved by the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(i64);

impl OperatorId {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperatorId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Which records an operator may edit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permissions {
    #[default]
    None,
    All,
    Records(BTreeSet<RecordId>),
}

impl Permissions {
    #[must_use]
    pub fn can_edit(&self, record: &RecordId) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Records(records) => records.contains(record),
        }
    }
}

/// An authenticated operator with an already-resolved permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub display_name: String,
    pub permissions: Permissions,
}

impl Operator {
    #[must_use]
    pub fn new(id: OperatorId, display_name: impl Into<String>, permissions: Permissions) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            permissions,
        }
    }

    #[must_use]
    pub fn can_edit(&self, record: &RecordId) -> bool {
        self.permissions.can_edit(record)
    }
}
