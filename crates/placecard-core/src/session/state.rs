use serde::{Deserialize, Serialize};

use crate::models::{FieldKind, Patch, RecordVersion};
use crate::sync::Conflict;

/// Why a session ended without saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Operator,
    IdleTimeout,
    /// The commit failed in a way retrying cannot fix.
    Failure,
}

/// Where a session is in the editing flow.
///
/// A session in `SelectingField` with staged changes is what operators see
/// as "staged": they can pick another field or confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    SelectingField,
    AwaitingValue { field: FieldKind },
    /// Input accepted for checking; only observable while a photo uploads.
    Validating { field: FieldKind },
    /// `resent` is set once the patch goes out again after a failed
    /// attempt, which may have been applied anyway.
    Confirming {
        patch: Patch,
        #[serde(default)]
        resent: bool,
    },
    Conflicted { conflict: Conflict },
    Committed { version: RecordVersion },
    Cancelled { reason: CancelReason },
}

impl SessionState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SelectingField => "selecting_field",
            Self::AwaitingValue { .. } => "awaiting_value",
            Self::Validating { .. } => "validating",
            Self::Confirming { .. } => "confirming",
            Self::Conflicted { .. } => "conflicted",
            Self::Committed { .. } => "committed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Committed and cancelled sessions accept no further input.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::Cancelled { .. })
    }
}
