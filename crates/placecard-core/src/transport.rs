//! Chat transport boundary
//!
//! Inbound events arrive already stripped of transport markup; outbound
//! messages are plain text with an optional list of choices the transport
//! renders however it likes (buttons, numbered list).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::models::{Operator, OperatorId, RecordId};

/// Choice value that confirms the staged changes.
pub const CONFIRM_CHOICE: &str = "confirm";
/// Choice value that cancels the session.
pub const CANCEL_CHOICE: &str = "cancel";
/// Choice value that retries after a conflict.
pub const RETRY_CHOICE: &str = "retry";

/// Explicit operator commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Start editing a record.
    Edit(RecordId),
    /// Start editing the one record with this name.
    Find(String),
    /// List records that still have blank fields.
    Unfilled,
    Confirm,
    Cancel,
    /// Retry after a conflict or a failed commit.
    Retry,
    /// Show the record card with staged changes.
    Show,
}

/// A binary attachment, optionally aimed at a photo slot.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    /// One-based photo slot as the operator numbers them.
    pub slot: Option<usize>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("len", &self.bytes.len())
            .field("slot", &self.slot)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Command(Command),
    Text(String),
    Attachment(Attachment),
    /// Value of a choice offered in an earlier outbound message.
    Choice(String),
}

/// One inbound event from an already authenticated operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorEvent {
    pub operator: Operator,
    /// Record the event is about, when the transport knows it.
    pub target: Option<RecordId>,
    pub payload: Payload,
}

impl OperatorEvent {
    pub fn new(operator: Operator, payload: Payload) -> Self {
        Self {
            operator,
            target: None,
            payload,
        }
    }

    #[must_use]
    pub fn for_record(mut self, target: RecordId) -> Self {
        self.target = Some(target);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub value: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Operator {0} is unreachable")]
    Unreachable(OperatorId),

    #[error("Transport failure: {0}")]
    Failed(String),
}

/// Sends messages to operators.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, operator: &OperatorId, message: OutboundMessage)
        -> Result<(), TransportError>;
}

/// Outbound transport that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(OperatorId, OutboundMessage)>>,
    unreachable: Mutex<BTreeSet<OperatorId>>,
}

impl RecordingOutbound {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send to `operator`.
    pub fn mark_unreachable(&self, operator: OperatorId) {
        self.unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operator);
    }

    /// Messages sent to `operator`, oldest first.
    #[must_use]
    pub fn messages_for(&self, operator: OperatorId) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(to, _)| *to == operator)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Most recent message sent to `operator`.
    #[must_use]
    pub fn last_for(&self, operator: OperatorId) -> Option<OutboundMessage> {
        self.messages_for(operator).pop()
    }

    /// Remove and return everything sent so far.
    pub fn drain(&self) -> Vec<(OperatorId, OutboundMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(
        &self,
        operator: &OperatorId,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        if self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(operator)
        {
            return Err(TransportError::Unreachable(*operator));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*operator, message));
        Ok(())
    }
}
