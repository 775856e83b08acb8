//! Change notifications
//!
//! After a commit lands, a [`RecordChanged`] event is handed to every
//! registered [`Subscriber`]. Delivery is best effort: a failing or slow
//! subscriber is logged and skipped, never surfaced to the committing
//! operator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{CompanyRecord, FieldKind, FieldValue, OperatorId, RecordId, RecordVersion};
use crate::transport::{Outbound, OutboundMessage};

/// Old and new value of one committed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub field: FieldKind,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// A committed change to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordChanged {
    pub record_id: RecordId,
    pub record_name: String,
    pub changed_fields: Vec<FieldKind>,
    pub operator: OperatorId,
    pub operator_name: String,
    pub new_version: RecordVersion,
    pub deltas: Vec<FieldDelta>,
}

impl RecordChanged {
    /// Build the event from the stored record before and after the write.
    #[must_use]
    pub fn from_commit(
        before: &CompanyRecord,
        after: &CompanyRecord,
        changed_fields: Vec<FieldKind>,
        operator: OperatorId,
        operator_name: impl Into<String>,
        new_version: RecordVersion,
    ) -> Self {
        let deltas = changed_fields
            .iter()
            .map(|field| FieldDelta {
                field: *field,
                old: before.get(*field),
                new: after.get(*field),
            })
            .collect();
        Self {
            record_id: after.id.clone(),
            record_name: after.name.clone(),
            changed_fields,
            operator,
            operator_name: operator_name.into(),
            new_version,
            deltas,
        }
    }
}

/// Human-readable summary of a change, one numbered line per field.
#[must_use]
pub fn render_change_summary(event: &RecordChanged) -> String {
    let mut lines = vec![
        format!("From: {} ({})", event.operator_name, event.operator),
        format!("Name: {} ({})", event.record_name, event.record_id),
        "Changes:".to_string(),
    ];
    lines.extend(event.deltas.iter().enumerate().map(|(index, delta)| {
        format!(
            "{}. {}: {} -> {}",
            index + 1,
            delta.field.label(),
            delta.old.render(),
            delta.new.render()
        )
    }));
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("Subscriber {0} timed out")]
    Timeout(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Receiver of [`RecordChanged`] events.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn notify(&self, event: &RecordChanged) -> Result<(), NotifyError>;
}

/// Fans committed changes out to subscribers.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    subscribers: Vec<Arc<dyn Subscriber>>,
    timeout: Duration,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            subscribers: Vec::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Deliver `event` to every subscriber. Returns how many accepted it.
    pub async fn dispatch(&self, event: &RecordChanged) -> usize {
        let mut delivered = 0;
        for subscriber in &self.subscribers {
            let result = match tokio::time::timeout(self.timeout, subscriber.notify(event)).await
            {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout(subscriber.name().to_string())),
            };

            match result {
                Ok(()) => delivered += 1,
                Err(error) => tracing::warn!(
                    subscriber = subscriber.name(),
                    record_id = %event.record_id,
                    version = %event.new_version,
                    %error,
                    "Change notification failed"
                ),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field(
                "subscribers",
                &self
                    .subscribers
                    .iter()
                    .map(|subscriber| subscriber.name())
                    .collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Relays change summaries to watcher operators over the chat transport.
/// The operator who made the change is not notified.
pub struct ChatRelay {
    outbound: Arc<dyn Outbound>,
    watchers: BTreeSet<OperatorId>,
}

impl ChatRelay {
    pub fn new(outbound: Arc<dyn Outbound>, watchers: impl IntoIterator<Item = OperatorId>) -> Self {
        Self {
            outbound,
            watchers: watchers.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Subscriber for ChatRelay {
    fn name(&self) -> &str {
        "chat_relay"
    }

    async fn notify(&self, event: &RecordChanged) -> Result<(), NotifyError> {
        let summary = render_change_summary(event);
        let mut failures = Vec::new();

        for watcher in self.watchers.iter().filter(|id| **id != event.operator) {
            if let Err(error) = self
                .outbound
                .send(watcher, OutboundMessage::text(summary.clone()))
                .await
            {
                failures.push(format!("{watcher}: {error}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::Delivery(failures.join("; ")))
        }
    }
}
