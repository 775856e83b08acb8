//! Editing sessions
//!
//! [`EditSession`] is a plain serializable state machine: it consumes
//! operator input and effect completions and returns [`Effect`]s to run.
//! [`SessionManager`] owns the live sessions, runs their effects against
//! the sync engine, photo manager and transport, and expires idle ones.

mod machine;
mod manager;
mod state;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{OperatorId, RecordId};

pub use machine::{Effect, EditSession, SessionInput};
pub use manager::{Clock, ManualClock, SessionManager, SystemClock};
pub use state::{CancelReason, SessionState};

/// Unique ID of one editing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new time-ordered session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Operator {operator} may not edit {record}")]
    NotAuthorized {
        operator: OperatorId,
        record: RecordId,
    },

    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    #[error("No record named {0:?}")]
    NameNotFound(String),

    #[error("Several records are named {name:?} ({}), use /edit <id>", join_ids(.matches))]
    AmbiguousRecord {
        name: String,
        matches: Vec<RecordId>,
    },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Nothing to save yet, edit a field first")]
    EmptyPatch,

    #[error("No active editing session, start one with /edit <id>")]
    SessionNotFound,

    #[error("Several sessions are open ({}), name the record", join_ids(.0))]
    AmbiguousSession(Vec<RecordId>),

    #[error("Cannot handle {event} while {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },

    /// Saving failed after retries. The session keeps its staged changes.
    #[error("Spreadsheet is unavailable, send /confirm to try again ({0})")]
    SyncUnavailable(String),
}

impl SessionError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotAuthorized { .. } => "not_authorized",
            Self::RecordNotFound(_) | Self::NameNotFound(_) => "record_not_found",
            Self::AmbiguousRecord { .. } => "ambiguous_record",
            Self::UnknownField(_) => "unknown_field",
            Self::EmptyPatch => "empty_patch",
            Self::SessionNotFound => "session_not_found",
            Self::AmbiguousSession(_) => "ambiguous_session",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::SyncUnavailable(_) => "sync_unavailable",
        }
    }
}

fn join_ids(ids: &[RecordId]) -> String {
    ids.iter()
        .map(RecordId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_ambiguous_message_lists_records() {
        let error = SessionError::AmbiguousSession(vec![
            RecordId::new("№1").unwrap(),
            RecordId::new("№2").unwrap(),
        ]);
        assert_eq!(error.code(), "ambiguous_session");
        assert!(error.to_string().contains("№1, №2"));
    }

    #[test]
    fn test_name_lookup_errors() {
        assert_eq!(
            SessionError::NameNotFound("Casa".to_string()).code(),
            "record_not_found"
        );
        let error = SessionError::AmbiguousRecord {
            name: "Casa".to_string(),
            matches: vec![RecordId::new("№1").unwrap(), RecordId::new("№2").unwrap()],
        };
        assert_eq!(error.code(), "ambiguous_record");
        assert!(error.to_string().contains("№1, №2"));
    }
}
