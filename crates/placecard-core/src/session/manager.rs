//! Live session registry and effect driver

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::models::{FieldKind, Operator, OperatorId, RecordId};
use crate::notify::{ChatRelay, NotificationDispatcher, Subscriber};
use crate::photo::PhotoAssetManager;
use crate::store::{FileStore, RecordStore};
use crate::sync::{SyncEngine, SyncError};
use crate::transport::{Command, Outbound, OperatorEvent, OutboundMessage, Payload};
use crate::validate::ValidationRules;

use super::machine::{Effect, EditSession, SessionInput};
use super::SessionError;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type SessionKey = (OperatorId, RecordId);
type SharedSession = Arc<tokio::sync::Mutex<EditSession>>;

/// Owns live sessions and runs their effects.
///
/// Each session sits behind its own async mutex, so events for one session
/// are handled one at a time in arrival order while different sessions
/// proceed concurrently. The registry lock is never held across an await.
pub struct SessionManager {
    sync: SyncEngine,
    photos: PhotoAssetManager,
    notifier: NotificationDispatcher,
    outbound: Arc<dyn Outbound>,
    clock: Arc<dyn Clock>,
    rules: ValidationRules,
    idle_timeout: chrono::Duration,
    sessions: Mutex<BTreeMap<SessionKey, SharedSession>>,
}

impl SessionManager {
    pub fn new(
        records: Arc<dyn RecordStore>,
        files: Arc<dyn FileStore>,
        outbound: Arc<dyn Outbound>,
        config: &EngineConfig,
    ) -> Self {
        let mut notifier = NotificationDispatcher::new(config.notification_timeout());
        if !config.watchers.is_empty() {
            notifier.subscribe(Arc::new(ChatRelay::new(
                outbound.clone(),
                config.watchers.iter().copied(),
            )));
        }

        Self {
            sync: SyncEngine::new(records, config.sync()),
            photos: PhotoAssetManager::new(files, config.upload_retry),
            notifier,
            outbound,
            clock: Arc::new(SystemClock),
            rules: config.validation.clone(),
            idle_timeout: chrono::Duration::from_std(config.idle_timeout())
                .unwrap_or(chrono::Duration::MAX),
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscriber>) -> Self {
        self.notifier.subscribe(subscriber);
        self
    }

    /// Handle one inbound event. Errors are also sent to the operator.
    pub async fn on_operator_event(&self, event: OperatorEvent) -> Result<(), SessionError> {
        let operator = event.operator.id;
        let result = self.route(event).await;
        if let Err(error) = &result {
            tracing::debug!(%operator, code = error.code(), %error, "Event rejected");
            self.send(operator, OutboundMessage::text(format!("{}: {error}", error.code())))
                .await;
        }
        result
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry().len()
    }

    /// Copy of the live session for (`operator`, `record`).
    pub async fn session(&self, operator: OperatorId, record: &RecordId) -> Option<EditSession> {
        let shared = self.registry().get(&(operator, record.clone())).cloned()?;
        let session = shared.lock().await;
        Some(session.clone())
    }

    /// Cancel every session idle for longer than the timeout. Returns how
    /// many were cancelled.
    pub async fn sweep_expired(&self) -> usize {
        let live: Vec<(SessionKey, SharedSession)> = self
            .registry()
            .iter()
            .map(|(key, session)| (key.clone(), session.clone()))
            .collect();

        let mut expired = 0;
        for (key, shared) in live {
            let mut session = shared.lock().await;
            if self.expire_if_idle(&mut session).await {
                self.remove(&key, &shared);
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(expired, "Swept idle sessions");
        }
        expired
    }

    /// Sweep idle sessions every `interval` until the task is aborted.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_expired().await;
            }
        })
    }

    async fn route(&self, event: OperatorEvent) -> Result<(), SessionError> {
        let payload = match event.payload {
            Payload::Command(Command::Edit(record)) => {
                return self.start(event.operator, record).await;
            }
            Payload::Command(Command::Find(name)) => {
                let record = self.find(&name).await?;
                return self.start(event.operator, record).await;
            }
            Payload::Command(Command::Unfilled) => {
                return self.list_unfilled(&event.operator).await;
            }
            payload => payload,
        };

        let (key, shared) = self
            .resolve(event.operator.id, event.target.as_ref())
            .await?;
        let mut session = shared.lock().await;

        if session.is_terminal() {
            self.remove(&key, &shared);
            return Err(SessionError::SessionNotFound);
        }
        if self.expire_if_idle(&mut session).await {
            self.remove(&key, &shared);
            return Err(SessionError::SessionNotFound);
        }

        let effects = session.handle(SessionInput::Payload(payload), self.clock.now())?;
        let result = self.drive(&mut session, effects).await;
        if session.is_terminal() {
            self.remove(&key, &shared);
        }
        result
    }

    async fn start(&self, operator: Operator, record: RecordId) -> Result<(), SessionError> {
        if !operator.can_edit(&record) {
            return Err(SessionError::NotAuthorized {
                operator: operator.id,
                record,
            });
        }

        let snapshot = self.sync.snapshot(&record).await.map_err(lookup_error)?;
        let (session, effects) =
            EditSession::start(operator, snapshot, self.rules.clone(), self.clock.now())?;

        let key = (session.operator().id, record);
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        let mut session = shared.lock().await;
        let replaced = self.registry().insert(key.clone(), shared.clone()).is_some();
        if replaced {
            tracing::info!(
                operator = %key.0,
                record_id = %key.1,
                "Replaced earlier session on the same record"
            );
        }

        self.drive(&mut session, effects).await
    }

    /// The one record named `name`.
    async fn find(&self, name: &str) -> Result<RecordId, SessionError> {
        let mut found = self.sync.find_by_name(name).await.map_err(lookup_error)?;
        match found.len() {
            0 => Err(SessionError::NameNotFound(name.trim().to_string())),
            1 => Ok(found.remove(0).id),
            _ => Err(SessionError::AmbiguousRecord {
                name: name.trim().to_string(),
                matches: found.into_iter().map(|record| record.id).collect(),
            }),
        }
    }

    /// Send `operator` the records they may edit that still have blank fields.
    async fn list_unfilled(&self, operator: &Operator) -> Result<(), SessionError> {
        let records = self.sync.unfilled().await.map_err(lookup_error)?;
        let lines: Vec<String> = records
            .iter()
            .filter(|record| operator.can_edit(&record.id))
            .map(|record| {
                let missing: Vec<&str> = record
                    .missing_fields()
                    .into_iter()
                    .map(FieldKind::label)
                    .collect();
                format!("{} {}: {}", record.id, record.name, missing.join(", "))
            })
            .collect();
        tracing::debug!(operator = %operator.id, count = lines.len(), "Listed unfilled records");

        let text = if lines.is_empty() {
            "Every record is filled in.".to_string()
        } else {
            format!("Records with blank fields:\n{}", lines.join("\n"))
        };
        self.send(operator.id, OutboundMessage::text(text)).await;
        Ok(())
    }

    /// Find the session an event is aimed at.
    async fn resolve(
        &self,
        operator: OperatorId,
        target: Option<&RecordId>,
    ) -> Result<(SessionKey, SharedSession), SessionError> {
        if let Some(record) = target {
            let key = (operator, record.clone());
            let shared = self
                .registry()
                .get(&key)
                .cloned()
                .ok_or(SessionError::SessionNotFound)?;
            return Ok((key, shared));
        }

        let mut candidates = self.sessions_of(operator);
        if candidates.len() > 1 {
            for (key, shared) in &candidates {
                let mut session = shared.lock().await;
                if self.expire_if_idle(&mut session).await {
                    self.remove(key, shared);
                }
            }
            candidates = self.sessions_of(operator);
        }

        match candidates.len() {
            0 => Err(SessionError::SessionNotFound),
            1 => Ok(candidates.remove(0)),
            _ => Err(SessionError::AmbiguousSession(
                candidates.into_iter().map(|((_, record), _)| record).collect(),
            )),
        }
    }

    fn sessions_of(&self, operator: OperatorId) -> Vec<(SessionKey, SharedSession)> {
        self.registry()
            .iter()
            .filter(|((owner, _), _)| *owner == operator)
            .map(|(key, session)| (key.clone(), session.clone()))
            .collect()
    }

    /// Cancel `session` if it sat idle too long. Returns whether it did.
    async fn expire_if_idle(&self, session: &mut EditSession) -> bool {
        let now = self.clock.now();
        if !session.is_expired(now, self.idle_timeout) {
            return false;
        }
        match session.handle(SessionInput::Expire, now) {
            Ok(effects) => {
                if let Err(error) = self.drive(session, effects).await {
                    tracing::warn!(session = %session.id(), %error, "Expiry effects failed");
                }
            }
            Err(error) => {
                tracing::warn!(session = %session.id(), %error, "Could not expire session");
            }
        }
        true
    }

    /// Run effects in order, feeding completions back into the session.
    async fn drive(
        &self,
        session: &mut EditSession,
        effects: Vec<Effect>,
    ) -> Result<(), SessionError> {
        let operator = session.operator().id;
        let mut queue = VecDeque::from(effects);

        while let Some(effect) = queue.pop_front() {
            let completion = match effect {
                Effect::Send(message) => {
                    self.send(operator, message).await;
                    None
                }
                Effect::UploadPhoto {
                    bytes,
                    photos,
                    slot,
                } => {
                    let result = self.photos.replace(&photos, slot, &bytes).await;
                    Some(SessionInput::PhotoUploaded(
                        result.map(|(_, photos)| photos),
                    ))
                }
                Effect::Commit(patch) => {
                    Some(SessionInput::CommitFinished(self.sync.commit(&patch).await))
                }
                Effect::Notify(event) => {
                    self.notifier.dispatch(&event).await;
                    None
                }
            };

            if let Some(input) = completion {
                queue.extend(session.handle(input, self.clock.now())?);
            }
        }
        Ok(())
    }

    async fn send(&self, operator: OperatorId, message: OutboundMessage) {
        if let Err(error) = self.outbound.send(&operator, message).await {
            tracing::warn!(%operator, %error, "Failed to deliver message");
        }
    }

    /// Drop the registry entry for `key` unless a newer session replaced it.
    fn remove(&self, key: &SessionKey, shared: &SharedSession) {
        let mut sessions = self.registry();
        if sessions
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, shared))
        {
            sessions.remove(key);
        }
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<SessionKey, SharedSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sync", &self.sync)
            .field("notifier", &self.notifier)
            .field("idle_timeout", &self.idle_timeout)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

fn lookup_error(error: SyncError) -> SessionError {
    match error {
        SyncError::RecordNotFound(id) => SessionError::RecordNotFound(id),
        other => SessionError::SyncUnavailable(other.to_string()),
    }
}
