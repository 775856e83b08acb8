//! Pure editing state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    AssetRef, Category, FieldChanges, FieldKind, FieldValue, InputKind, Operator, Patch,
    RecordId, Snapshot, FIELD_CATALOG,
};
use crate::notify::RecordChanged;
use crate::photo::{self, PhotoError};
use crate::sync::{CommitOutcome, Conflict, SyncError};
use crate::transport::{
    Attachment, Choice, Command, OutboundMessage, Payload, CANCEL_CHOICE, CONFIRM_CHOICE,
    RETRY_CHOICE,
};
use crate::validate::{self, ReasonCode, ValidationError, ValidationRules, CLEAR_MARKER};

use super::state::{CancelReason, SessionState};
use super::{SessionError, SessionId};

/// Everything a session reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Payload(Payload),
    /// Completion of [`Effect::UploadPhoto`]: the photo list with the
    /// upload in place.
    PhotoUploaded(Result<Vec<AssetRef>, PhotoError>),
    /// Completion of [`Effect::Commit`].
    CommitFinished(Result<CommitOutcome, SyncError>),
    /// The idle timeout elapsed.
    Expire,
}

impl SessionInput {
    const fn name(&self) -> &'static str {
        match self {
            Self::Payload(Payload::Command(command)) => match command {
                Command::Edit(_) => "edit",
                Command::Find(_) => "find",
                Command::Unfilled => "unfilled",
                Command::Confirm => "confirm",
                Command::Cancel => "cancel",
                Command::Retry => "retry",
                Command::Show => "show",
            },
            Self::Payload(Payload::Text(_)) => "text",
            Self::Payload(Payload::Attachment(_)) => "attachment",
            Self::Payload(Payload::Choice(_)) => "choice",
            Self::PhotoUploaded(_) => "photo_uploaded",
            Self::CommitFinished(_) => "commit_finished",
            Self::Expire => "expire",
        }
    }

    /// Treat well-known choice values as the commands they stand for.
    fn normalize(self) -> Self {
        match self {
            Self::Payload(Payload::Choice(value)) => {
                let command = match value.as_str() {
                    CONFIRM_CHOICE => Command::Confirm,
                    CANCEL_CHOICE => Command::Cancel,
                    RETRY_CHOICE => Command::Retry,
                    _ => return Self::Payload(Payload::Choice(value)),
                };
                Self::Payload(Payload::Command(command))
            }
            other => other,
        }
    }
}

/// Work the session asks its driver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(OutboundMessage),
    /// Upload photo bytes into zero-based `slot` of `photos`.
    UploadPhoto {
        bytes: Vec<u8>,
        photos: Vec<AssetRef>,
        slot: Option<usize>,
    },
    Commit(Patch),
    Notify(RecordChanged),
}

fn send(text: impl Into<String>) -> Effect {
    Effect::Send(OutboundMessage::text(text))
}

/// One operator editing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSession {
    id: SessionId,
    operator: Operator,
    /// Snapshot the staged changes are computed against.
    base: Snapshot,
    state: SessionState,
    staged: FieldChanges,
    rules: ValidationRules,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EditSession {
    /// Open a session on `base`. Returns the greeting effects.
    pub fn start(
        operator: Operator,
        base: Snapshot,
        rules: ValidationRules,
        now: DateTime<Utc>,
    ) -> Result<(Self, Vec<Effect>), SessionError> {
        if !operator.can_edit(&base.record.id) {
            return Err(SessionError::NotAuthorized {
                operator: operator.id,
                record: base.record.id,
            });
        }

        let session = Self {
            id: SessionId::new(),
            operator,
            base,
            state: SessionState::SelectingField,
            staged: FieldChanges::new(),
            rules,
            created_at: now,
            updated_at: now,
        };
        tracing::info!(
            session = %session.id,
            operator = %session.operator.id,
            record_id = %session.record_id(),
            version = %session.base.version,
            "Session started"
        );
        let effects = vec![send(session.card()), Effect::Send(session.field_menu())];
        Ok((session, effects))
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn operator(&self) -> &Operator {
        &self.operator
    }

    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        &self.base.record.id
    }

    #[must_use]
    pub const fn base(&self) -> &Snapshot {
        &self.base
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub const fn staged(&self) -> &FieldChanges {
        &self.staged
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.state, SessionState::Cancelled { .. })
    }

    /// Whether the session saw no input for `idle_timeout`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        !self.is_terminal() && now - self.updated_at >= idle_timeout
    }

    /// Advance the session. Errors leave the state untouched.
    pub fn handle(
        &mut self,
        input: SessionInput,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, SessionError> {
        if self.is_terminal() {
            return Err(SessionError::SessionNotFound);
        }

        let input = input.normalize();
        match input {
            SessionInput::Expire => Ok(self.cancel(CancelReason::IdleTimeout)),
            SessionInput::Payload(Payload::Command(Command::Cancel)) => {
                self.updated_at = now;
                Ok(self.cancel(CancelReason::Operator))
            }
            SessionInput::Payload(Payload::Command(Command::Show)) => {
                self.updated_at = now;
                Ok(vec![send(self.card())])
            }
            input => {
                if matches!(input, SessionInput::Payload(_)) {
                    self.updated_at = now;
                }
                self.step(input, now)
            }
        }
    }

    fn step(
        &mut self,
        input: SessionInput,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, SessionError> {
        let invalid = SessionError::InvalidTransition {
            state: self.state.name(),
            event: input.name(),
        };

        match (self.state.clone(), input) {
            (
                SessionState::SelectingField,
                SessionInput::Payload(Payload::Command(Command::Confirm)),
            ) => self.confirm(now),
            (
                SessionState::SelectingField,
                SessionInput::Payload(Payload::Text(name) | Payload::Choice(name)),
            ) => {
                let field = FieldKind::parse(&name)
                    .ok_or_else(|| SessionError::UnknownField(name.trim().to_string()))?;
                self.state = SessionState::AwaitingValue { field };
                Ok(vec![Effect::Send(self.prompt(field))])
            }
            (
                SessionState::AwaitingValue { field },
                SessionInput::Payload(Payload::Text(text) | Payload::Choice(text)),
            ) => Ok(self.receive_text(field, &text)),
            (
                SessionState::AwaitingValue { field },
                SessionInput::Payload(Payload::Attachment(attachment)),
            ) => Ok(self.receive_attachment(field, attachment)),
            (SessionState::Validating { field }, SessionInput::PhotoUploaded(result)) => {
                Ok(self.photo_uploaded(field, result))
            }
            (
                SessionState::Confirming { patch, .. },
                SessionInput::Payload(Payload::Command(Command::Confirm | Command::Retry)),
            ) => {
                self.state = SessionState::Confirming {
                    patch: patch.clone(),
                    resent: true,
                };
                Ok(vec![
                    send(format!("Saving changes to {} again...", self.record_id())),
                    Effect::Commit(patch),
                ])
            }
            (SessionState::Confirming { .. }, SessionInput::CommitFinished(result)) => {
                self.commit_finished(result)
            }
            (
                SessionState::Conflicted { conflict },
                SessionInput::Payload(Payload::Command(Command::Retry)),
            ) => self.rebase(conflict, now),
            _ => Err(invalid),
        }
    }

    fn confirm(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>, SessionError> {
        if self.staged.is_empty() {
            return Err(SessionError::EmptyPatch);
        }
        let patch = Patch::new(self.base.clone(), self.staged.clone(), self.operator.id, now)
            .map_err(|_| SessionError::EmptyPatch)?;
        self.state = SessionState::Confirming {
            patch: patch.clone(),
            resent: false,
        };
        Ok(vec![
            send(format!(
                "Saving {} change(s) to {}...",
                patch.changes().len(),
                self.record_id()
            )),
            Effect::Commit(patch),
        ])
    }

    fn receive_text(&mut self, field: FieldKind, text: &str) -> Vec<Effect> {
        if field.spec().input == InputKind::Binary {
            return self.receive_photo_command(text);
        }
        match validate::validate(field, text, &self.rules) {
            Ok(value) => self.stage(value),
            Err(error) => self.reject(field, &error),
        }
    }

    /// `-` clears every photo, `remove N` drops photo N.
    fn receive_photo_command(&mut self, text: &str) -> Vec<Effect> {
        let text = text.trim();
        if text == CLEAR_MARKER {
            return self.stage(FieldValue::Photos(Vec::new()));
        }
        let Some(slot) = parse_remove_command(text) else {
            return self.reject(FieldKind::Photos, &ReasonCode::BinaryRequired.into());
        };

        let removed = slot
            .checked_sub(1)
            .ok_or(PhotoError::NoSuchSlot { slot })
            .and_then(|index| photo::remove(&self.current_photos(), index));
        match removed {
            Ok(photos) => self.stage(FieldValue::Photos(photos)),
            Err(error) => vec![send(format!("{}: {error}", error.code()))],
        }
    }

    fn receive_attachment(&mut self, field: FieldKind, attachment: Attachment) -> Vec<Effect> {
        if field.spec().input != InputKind::Binary {
            return self.reject(field, &ReasonCode::TextRequired.into());
        }
        if let Err(error) = validate::validate_photo(&attachment.bytes) {
            return self.reject(field, &error);
        }

        self.state = SessionState::Validating { field };
        vec![Effect::UploadPhoto {
            bytes: attachment.bytes,
            photos: self.current_photos(),
            slot: attachment.slot.map(|slot| slot.saturating_sub(1)),
        }]
    }

    fn photo_uploaded(
        &mut self,
        field: FieldKind,
        result: Result<Vec<AssetRef>, PhotoError>,
    ) -> Vec<Effect> {
        match result {
            Ok(photos) => self.stage(FieldValue::Photos(photos)),
            Err(error) => {
                self.state = SessionState::AwaitingValue { field };
                let mut text = format!("{}: {error}", error.code());
                if error.is_retryable() {
                    text.push_str("\nSend the photo again to retry.");
                }
                vec![send(text)]
            }
        }
    }

    /// Stage `value`, or unstage its field when it equals the base value.
    fn stage(&mut self, value: FieldValue) -> Vec<Effect> {
        let field = value.kind();
        let text = if self.base.record.get(field) == value {
            self.staged.remove(field);
            format!("{} unchanged.", field.label())
        } else {
            let text = format!("{}: {} (staged)", field.label(), value.render());
            self.staged.insert(value);
            text
        };
        self.state = SessionState::SelectingField;
        vec![send(text), Effect::Send(self.field_menu())]
    }

    fn reject(&mut self, field: FieldKind, error: &ValidationError) -> Vec<Effect> {
        self.state = SessionState::AwaitingValue { field };
        let mut text = format!("{}: {}", error.code(), error.detail);
        if error.detail != error.reason.hint() {
            text.push('\n');
            text.push_str(error.reason.hint());
        }
        vec![send(text)]
    }

    fn commit_finished(
        &mut self,
        result: Result<CommitOutcome, SyncError>,
    ) -> Result<Vec<Effect>, SessionError> {
        match result {
            Ok(CommitOutcome::Committed {
                version,
                changed_fields,
                before,
                after,
            }) => {
                // An earlier failed attempt may be the write that landed.
                let (changed_fields, before) = match &self.state {
                    SessionState::Confirming {
                        patch,
                        resent: true,
                    } if changed_fields.is_empty() => {
                        let base = patch.base().clone();
                        let landed = patch
                            .changes()
                            .fields()
                            .filter(|field| base.get(*field) != after.get(*field))
                            .collect();
                        (landed, base)
                    }
                    _ => (changed_fields, before),
                };
                self.state = SessionState::Committed { version };
                tracing::info!(
                    session = %self.id,
                    record_id = %self.record_id(),
                    %version,
                    fields = changed_fields.len(),
                    "Session committed"
                );

                let mut effects = vec![if changed_fields.is_empty() {
                    send(format!("{} already had these values.", self.record_id()))
                } else {
                    send(format!("Saved {} ({version}).", self.record_id()))
                }];
                if !changed_fields.is_empty() {
                    effects.push(Effect::Notify(RecordChanged::from_commit(
                        &before,
                        &after,
                        changed_fields,
                        self.operator.id,
                        self.operator.display_name.clone(),
                        version,
                    )));
                }
                Ok(effects)
            }
            Ok(CommitOutcome::Conflict(conflict)) => {
                let message = OutboundMessage::text(conflict.render()).with_choices(vec![
                    Choice::new("Retry", RETRY_CHOICE),
                    Choice::new("Cancel", CANCEL_CHOICE),
                ]);
                self.state = SessionState::Conflicted { conflict };
                Ok(vec![Effect::Send(message)])
            }
            Err(error) if error.is_retryable() => {
                tracing::warn!(
                    session = %self.id,
                    record_id = %self.record_id(),
                    %error,
                    "Commit failed, staged changes kept"
                );
                Err(SessionError::SyncUnavailable(error.to_string()))
            }
            Err(error) => {
                tracing::error!(
                    session = %self.id,
                    record_id = %self.record_id(),
                    code = error.code(),
                    %error,
                    "Commit failed permanently, cancelling session"
                );
                self.state = SessionState::Cancelled {
                    reason: CancelReason::Failure,
                };
                Ok(vec![send(format!(
                    "{}: {error}\nNothing was saved.",
                    error.code()
                ))])
            }
        }
    }

    /// Move onto the record as it is now and try again.
    ///
    /// A plain conflict drops the conflicting staged fields; after a lost
    /// update every staged value is written again.
    fn rebase(
        &mut self,
        conflict: Conflict,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, SessionError> {
        if !conflict.lost_update {
            let conflicting: Vec<FieldKind> = conflict.conflicting_fields().collect();
            for field in conflicting {
                self.staged.remove(field);
            }
        }
        self.base = conflict.remote;
        let current = &self.base.record;
        self.staged.retain(|value| current.get(value.kind()) != *value);

        tracing::info!(
            session = %self.id,
            record_id = %self.record_id(),
            version = %self.base.version,
            kept = self.staged.len(),
            "Session rebased onto current record"
        );

        if self.staged.is_empty() {
            self.state = SessionState::SelectingField;
            return Ok(vec![
                send(format!("Nothing left to save.\n\n{}", self.card())),
                Effect::Send(self.field_menu()),
            ]);
        }
        self.confirm(now)
    }

    fn cancel(&mut self, reason: CancelReason) -> Vec<Effect> {
        self.state = SessionState::Cancelled { reason };
        tracing::info!(
            session = %self.id,
            record_id = %self.record_id(),
            ?reason,
            "Session cancelled"
        );
        let text = match reason {
            CancelReason::IdleTimeout => {
                format!("Editing {} timed out. Nothing was saved.", self.record_id())
            }
            _ => format!("Editing {} cancelled. Nothing was saved.", self.record_id()),
        };
        vec![send(text)]
    }

    fn current_value(&self, field: FieldKind) -> FieldValue {
        self.staged
            .get(field)
            .cloned()
            .unwrap_or_else(|| self.base.record.get(field))
    }

    fn current_photos(&self) -> Vec<AssetRef> {
        match self.current_value(FieldKind::Photos) {
            FieldValue::Photos(photos) => photos,
            _ => Vec::new(),
        }
    }

    /// Record card followed by the staged changes.
    #[must_use]
    pub fn card(&self) -> String {
        let mut lines = vec![
            self.base.record.render_card(),
            format!("Version: {}", self.base.version),
        ];
        if !self.staged.is_empty() {
            lines.push(String::new());
            lines.push("Staged changes:".to_string());
            lines.extend(self.staged.values().enumerate().map(|(index, value)| {
                format!(
                    "{}. {}: {} -> {}",
                    index + 1,
                    value.kind().label(),
                    self.base.record.get(value.kind()).render(),
                    value.render()
                )
            }));
        }
        lines.join("\n")
    }

    fn field_menu(&self) -> OutboundMessage {
        let mut choices: Vec<Choice> = FIELD_CATALOG
            .iter()
            .map(|spec| {
                let label = if self.staged.contains(spec.kind) {
                    format!("{} *", spec.label)
                } else {
                    spec.label.to_string()
                };
                Choice::new(label, spec.key)
            })
            .collect();

        let text = if self.staged.is_empty() {
            "Which field do you want to edit?".to_string()
        } else {
            choices.push(Choice::new("Confirm", CONFIRM_CHOICE));
            format!(
                "{} change(s) staged. Pick another field or confirm to save.",
                self.staged.len()
            )
        };
        choices.push(Choice::new("Cancel", CANCEL_CHOICE));
        OutboundMessage::text(text).with_choices(choices)
    }

    fn prompt(&self, field: FieldKind) -> OutboundMessage {
        let spec = field.spec();
        let mut lines = vec![spec.prompt.to_string()];

        if field == FieldKind::Photos {
            let photos = self.current_photos();
            if photos.is_empty() {
                lines.push("No photos yet.".to_string());
            } else {
                lines.push("Current photos:".to_string());
                lines.extend(
                    photos
                        .iter()
                        .enumerate()
                        .map(|(index, asset)| format!("{}. {asset}", index + 1)),
                );
            }
        } else {
            lines.push(format!("Current: {}", self.current_value(field).render()));
        }
        if spec.optional {
            lines.push(format!("Send {CLEAR_MARKER} to clear it."));
        }

        let choices = match spec.input {
            InputKind::Choice => Category::ALL
                .into_iter()
                .map(|category| Choice::new(category.label(), category.key()))
                .collect(),
            InputKind::Text | InputKind::Binary => Vec::new(),
        };
        OutboundMessage::text(lines.join("\n")).with_choices(choices)
    }
}

fn parse_remove_command(text: &str) -> Option<usize> {
    let (verb, slot) = text.split_once(char::is_whitespace)?;
    if !verb.eq_ignore_ascii_case("remove") {
        return None;
    }
    slot.trim().parse().ok()
}
