//! Synchronization engine
//!
//! Commits a confirmed [`Patch`] against the spreadsheet using optimistic
//! concurrency. When the record moved on since the patch's base snapshot,
//! changes to disjoint fields are merged automatically; overlapping changes
//! with different values come back as a [`Conflict`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    apply, diff, CompanyRecord, FieldChanges, FieldKind, FieldValue, Patch, RecordId,
    RecordVersion, Snapshot,
};
use crate::retry::{with_backoff, RetryPolicy};
use crate::store::{RecordStore, StoreError, WriteOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The store stayed unreachable after retries, or kept changing under us.
    #[error("Spreadsheet is unavailable: {0}")]
    Unavailable(String),

    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    /// The patch does not fit the current record. This is a bug, not a
    /// user error.
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    /// The store refused the request or returned data it cannot parse.
    #[error(transparent)]
    Store(StoreError),
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "sync_unavailable",
            Self::RecordNotFound(_) => "record_not_found",
            Self::InvalidPatch(_) => "invalid_patch",
            Self::Store(error) => error.code(),
        }
    }

    /// Whether the same patch may be committed again later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::RecordNotFound(id),
            StoreError::Unavailable(message) => Self::Unavailable(message),
            other => Self::Store(other),
        }
    }
}

/// One field both sides changed to different values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: FieldKind,
    /// Value in the patch's base snapshot.
    pub original: FieldValue,
    pub ours: FieldValue,
    pub theirs: FieldValue,
}

/// Concurrent edits that could not be merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub record_id: RecordId,
    pub base_version: RecordVersion,
    /// The record as it is now in the store.
    pub remote: Snapshot,
    pub fields: Vec<FieldConflict>,
    /// Our write went through but was overwritten before it could be
    /// verified.
    pub lost_update: bool,
}

impl Conflict {
    /// Fields in conflict.
    pub fn conflicting_fields(&self) -> impl Iterator<Item = FieldKind> + '_ {
        self.fields.iter().map(|conflict| conflict.field)
    }

    /// Operator-facing explanation.
    #[must_use]
    pub fn render(&self) -> String {
        let mut lines = vec![if self.lost_update {
            format!(
                "Your changes to {} were saved but then overwritten by another edit.",
                self.record_id
            )
        } else {
            format!(
                "{} was changed by someone else while you were editing.",
                self.record_id
            )
        }];
        for (index, conflict) in self.fields.iter().enumerate() {
            lines.push(format!("{}. {}", index + 1, conflict.field.label()));
            lines.push(format!("   original: {}", conflict.original.render()));
            lines.push(format!("   yours: {}", conflict.ours.render()));
            lines.push(format!("   theirs: {}", conflict.theirs.render()));
        }
        lines.push(if self.lost_update {
            "Send /retry to save your values again, or /cancel.".to_string()
        } else {
            "Send /retry to save your other changes on top of the latest version, or /cancel."
                .to_string()
        });
        lines.join("\n")
    }
}

/// Result of a commit attempt that reached the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum CommitOutcome {
    Committed {
        version: RecordVersion,
        /// Fields whose stored value changed. Empty when the store already
        /// held every value of the patch.
        changed_fields: Vec<FieldKind>,
        /// The stored record right before the write.
        before: CompanyRecord,
        after: CompanyRecord,
    },
    Conflict(Conflict),
}

/// What [`reconcile`] decided for a patch and the current remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Write `record`, which differs from the remote one in `changes`.
    Write {
        record: CompanyRecord,
        changes: FieldChanges,
    },
    /// The remote record already holds every value of the patch.
    Unchanged,
    Conflict(Conflict),
}

/// Decide how `patch` lands on `remote`. Pure.
///
/// A field conflicts when the remote value moved away from the patch's base
/// and is not the value the patch sets. Identical values on both sides are
/// not a conflict.
pub fn reconcile(patch: &Patch, remote: &Snapshot) -> Result<Reconciled, SyncError> {
    if remote.record.id != *patch.record_id() {
        return Err(SyncError::InvalidPatch(format!(
            "patch for {} applied to {}",
            patch.record_id(),
            remote.record.id
        )));
    }

    if remote.version != patch.base_version() {
        let remote_changes = diff(patch.base(), &remote.record);
        let fields: Vec<FieldConflict> = patch
            .changes()
            .values()
            .filter(|ours| remote_changes.get(ours.kind()).is_some_and(|theirs| theirs != *ours))
            .map(|ours| FieldConflict {
                field: ours.kind(),
                original: patch.base().get(ours.kind()),
                ours: ours.clone(),
                theirs: remote.record.get(ours.kind()),
            })
            .collect();

        if !fields.is_empty() {
            return Ok(Reconciled::Conflict(Conflict {
                record_id: patch.record_id().clone(),
                base_version: patch.base_version(),
                remote: remote.clone(),
                fields,
                lost_update: false,
            }));
        }
    }

    let mut changes = patch.changes().clone();
    changes.retain(|ours| remote.record.get(ours.kind()) != *ours);
    if changes.is_empty() {
        return Ok(Reconciled::Unchanged);
    }

    let record = apply(&remote.record, &changes)
        .map_err(|error| SyncError::InvalidPatch(error.to_string()))?;
    Ok(Reconciled::Write { record, changes })
}

/// Tuning for [`SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    /// How many fetch-merge-write rounds to run when the version keeps
    /// moving between fetch and write.
    pub max_merge_rounds: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_merge_rounds: 3,
        }
    }
}

pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// Current snapshot of a record, retrying transient failures.
    pub async fn snapshot(&self, id: &RecordId) -> Result<Snapshot, SyncError> {
        with_backoff(&self.config.retry, "record fetch", || self.store.fetch(id))
            .await
            .map_err(SyncError::from)
    }

    /// Records named `name`, retrying transient failures.
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<CompanyRecord>, SyncError> {
        with_backoff(&self.config.retry, "record search", || {
            self.store.find_by_name(name)
        })
        .await
        .map_err(SyncError::from)
    }

    /// Records with blank fields, retrying transient failures.
    pub async fn unfilled(&self) -> Result<Vec<CompanyRecord>, SyncError> {
        with_backoff(&self.config.retry, "unfilled listing", || self.store.unfilled())
            .await
            .map_err(SyncError::from)
    }

    /// Commit a confirmed patch.
    pub async fn commit(&self, patch: &Patch) -> Result<CommitOutcome, SyncError> {
        let id = patch.record_id();
        let rounds = self.config.max_merge_rounds.max(1);
        // Record we last tried to write over. A write whose response was
        // lost may still have landed on it.
        let mut attempted: Option<CompanyRecord> = None;

        for round in 1..=rounds {
            let remote = self.snapshot(id).await?;
            let (record, changes) = match reconcile(patch, &remote)? {
                Reconciled::Conflict(conflict) => {
                    tracing::warn!(
                        record_id = %id,
                        base = %patch.base_version(),
                        remote = %remote.version,
                        fields = ?conflict.conflicting_fields().collect::<Vec<_>>(),
                        "Concurrent edit conflict"
                    );
                    return Ok(CommitOutcome::Conflict(conflict));
                }
                Reconciled::Unchanged => {
                    let before = attempted.take().unwrap_or_else(|| remote.record.clone());
                    let changed_fields: Vec<FieldKind> = patch
                        .changes()
                        .fields()
                        .filter(|field| before.get(*field) != remote.record.get(*field))
                        .collect();
                    tracing::info!(
                        record_id = %id,
                        version = %remote.version,
                        fields = ?changed_fields,
                        "Patch already applied"
                    );
                    return Ok(CommitOutcome::Committed {
                        version: remote.version,
                        changed_fields,
                        before,
                        after: remote.record,
                    });
                }
                Reconciled::Write { record, changes } => (record, changes),
            };

            let outcome = with_backoff(&self.config.retry, "record write", || {
                self.store.write(id, &record, remote.version)
            })
            .await?;

            match outcome {
                WriteOutcome::Written(version) => {
                    if !self.store.atomic_writes() {
                        if let Some(conflict) =
                            self.verify_write(patch, &remote, &record, &changes, version).await
                        {
                            return Ok(CommitOutcome::Conflict(conflict));
                        }
                    }

                    let changed_fields: Vec<FieldKind> = changes.fields().collect();
                    tracing::info!(
                        record_id = %id,
                        %version,
                        merged = remote.version != patch.base_version(),
                        fields = ?changed_fields,
                        "Committed patch"
                    );
                    return Ok(CommitOutcome::Committed {
                        version,
                        changed_fields,
                        before: remote.record,
                        after: record,
                    });
                }
                WriteOutcome::VersionMismatch(current) => {
                    tracing::debug!(
                        record_id = %id,
                        round,
                        expected = %remote.version,
                        %current,
                        "Record changed between fetch and write"
                    );
                    attempted = Some(remote.record);
                }
            }
        }

        tracing::warn!(record_id = %id, rounds, "Record kept changing, giving up");
        Err(SyncError::Unavailable(format!(
            "{id} kept changing during {rounds} attempts"
        )))
    }

    /// Re-read a non-atomic write. Returns a lost-update conflict when
    /// another writer overwrote any of our values.
    async fn verify_write(
        &self,
        patch: &Patch,
        before: &Snapshot,
        written: &CompanyRecord,
        changes: &FieldChanges,
        version: RecordVersion,
    ) -> Option<Conflict> {
        let current = match self.snapshot(patch.record_id()).await {
            Ok(current) => current,
            Err(error) => {
                tracing::warn!(
                    record_id = %patch.record_id(),
                    %error,
                    "Could not verify write; assuming it stuck"
                );
                return None;
            }
        };

        if current.version == version && current.record == *written {
            return None;
        }

        let fields: Vec<FieldConflict> = changes
            .values()
            .filter(|ours| current.record.get(ours.kind()) != **ours)
            .map(|ours| FieldConflict {
                field: ours.kind(),
                original: before.record.get(ours.kind()),
                ours: ours.clone(),
                theirs: current.record.get(ours.kind()),
            })
            .collect();
        if fields.is_empty() {
            return None;
        }

        tracing::warn!(
            record_id = %patch.record_id(),
            written = %version,
            current = %current.version,
            "Write was overwritten by a concurrent writer"
        );
        Some(Conflict {
            record_id: patch.record_id().clone(),
            base_version: patch.base_version(),
            remote: current,
            fields,
            lost_update: true,
        })
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("atomic_writes", &self.store.atomic_writes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, MapLink, OperatorId, PhoneNumber};
    use crate::store::MemoryRecordStore;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn id() -> RecordId {
        RecordId::new("№310").unwrap()
    }

    fn base() -> CompanyRecord {
        CompanyRecord::new(id(), "Casa Verde").unwrap()
    }

    fn phone(raw: &str) -> FieldValue {
        FieldValue::Phone(Some(PhoneNumber::from_canonical(raw).unwrap()))
    }

    fn map(raw: &str) -> FieldValue {
        FieldValue::MapLink(Some(MapLink::from_canonical(raw).unwrap()))
    }

    fn patch(base: Snapshot, values: Vec<FieldValue>) -> Patch {
        Patch::new(base, values.into(), OperatorId::new(7), Utc::now()).unwrap()
    }

    fn engine(store: Arc<MemoryRecordStore>) -> SyncEngine {
        SyncEngine::new(
            store,
            SyncConfig {
                retry: RetryPolicy::no_retry(),
                max_merge_rounds: 3,
            },
        )
    }

    #[test]
    fn test_reconcile_same_version_writes_patch() {
        let snapshot = Snapshot::new(base(), RecordVersion::INITIAL);
        let patch = patch(snapshot.clone(), vec![phone("+50688887777")]);

        match reconcile(&patch, &snapshot).unwrap() {
            Reconciled::Write { record, changes } => {
                assert_eq!(record.get(FieldKind::Phone), phone("+50688887777"));
                assert_eq!(changes.len(), 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_reconcile_merges_disjoint_fields() {
        let snapshot = Snapshot::new(base(), RecordVersion::INITIAL);
        let patch = patch(snapshot, vec![phone("+50688887777")]);

        let mut theirs = base();
        theirs.category = Some(Category::Services);
        let remote = Snapshot::new(theirs, RecordVersion::new(2));

        match reconcile(&patch, &remote).unwrap() {
            Reconciled::Write { record, .. } => {
                assert_eq!(record.category, Some(Category::Services));
                assert_eq!(record.get(FieldKind::Phone), phone("+50688887777"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_reconcile_reports_overlapping_fields() {
        let snapshot = Snapshot::new(base(), RecordVersion::INITIAL);
        let patch = patch(snapshot, vec![map("https://maps.app.goo.gl/ours")]);

        let mut theirs = base();
        theirs.set(map("https://maps.app.goo.gl/theirs"));
        let remote = Snapshot::new(theirs, RecordVersion::new(2));

        let Reconciled::Conflict(conflict) = reconcile(&patch, &remote).unwrap() else {
            panic!("expected conflict");
        };
        assert_eq!(conflict.fields.len(), 1);
        assert_eq!(conflict.fields[0].field, FieldKind::MapLink);
        assert_eq!(conflict.fields[0].original, FieldValue::MapLink(None));
        assert_eq!(conflict.fields[0].theirs, map("https://maps.app.goo.gl/theirs"));
        assert!(!conflict.lost_update);
        assert!(conflict.render().contains("Google map"));
    }

    #[test]
    fn test_reconcile_identical_values_do_not_conflict() {
        let snapshot = Snapshot::new(base(), RecordVersion::INITIAL);
        let patch = patch(snapshot, vec![phone("+50688887777")]);

        let mut theirs = base();
        theirs.set(phone("+50688887777"));
        let remote = Snapshot::new(theirs, RecordVersion::new(2));

        assert_eq!(reconcile(&patch, &remote).unwrap(), Reconciled::Unchanged);
    }

    #[test]
    fn test_reconcile_rejects_other_record() {
        let snapshot = Snapshot::new(base(), RecordVersion::INITIAL);
        let patch = patch(snapshot, vec![phone("+50688887777")]);
        let other = CompanyRecord::new(RecordId::new("№311").unwrap(), "Other").unwrap();

        assert_eq!(
            reconcile(&patch, &Snapshot::new(other, RecordVersion::INITIAL))
                .unwrap_err()
                .code(),
            "invalid_patch"
        );
    }

    #[tokio::test]
    async fn test_commit_writes_and_bumps_version() {
        let store = Arc::new(MemoryRecordStore::with_records([base()]));
        let engine = engine(store.clone());
        let snapshot = engine.snapshot(&id()).await.unwrap();

        let outcome = engine
            .commit(&patch(snapshot, vec![phone("+50688887777")]))
            .await
            .unwrap();

        let CommitOutcome::Committed {
            version,
            changed_fields,
            ..
        } = outcome
        else {
            panic!("expected commit");
        };
        assert_eq!(version, RecordVersion::new(2));
        assert_eq!(changed_fields, vec![FieldKind::Phone]);
        assert_eq!(store.get(&id()).unwrap().version, version);
    }

    #[tokio::test]
    async fn test_commit_retries_merge_after_write_race() {
        let store = Arc::new(MemoryRecordStore::with_records([base()]));
        let engine = engine(store.clone());
        let snapshot = engine.snapshot(&id()).await.unwrap();

        let mut concurrent = base();
        concurrent.category = Some(Category::Adventures);
        store.interleave_before_next_write(concurrent);

        let outcome = engine
            .commit(&patch(snapshot, vec![phone("+50688887777")]))
            .await
            .unwrap();

        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
        let stored = store.get(&id()).unwrap();
        assert_eq!(stored.version, RecordVersion::new(3));
        assert_eq!(stored.record.category, Some(Category::Adventures));
        assert_eq!(stored.record.get(FieldKind::Phone), phone("+50688887777"));
    }

    #[tokio::test]
    async fn test_commit_missing_record() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = engine(store);
        let snapshot = Snapshot::new(base(), RecordVersion::INITIAL);

        let error = engine
            .commit(&patch(snapshot, vec![phone("+50688887777")]))
            .await
            .unwrap_err();
        assert_eq!(error, SyncError::RecordNotFound(id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_unavailable_after_retries() {
        let store = Arc::new(MemoryRecordStore::with_records([base()]));
        let engine = SyncEngine::new(
            store.clone(),
            SyncConfig {
                retry: RetryPolicy {
                    max_attempts: 2,
                    initial_backoff_ms: 10,
                    max_backoff_ms: 10,
                },
                max_merge_rounds: 3,
            },
        );
        let snapshot = engine.snapshot(&id()).await.unwrap();
        store.fail_next_writes(2);

        let error = engine
            .commit(&patch(snapshot.clone(), vec![phone("+50688887777")]))
            .await
            .unwrap_err();
        assert_eq!(error.code(), "sync_unavailable");
        assert!(error.is_retryable());
        assert_eq!(store.get(&id()).unwrap().version, RecordVersion::INITIAL);

        assert!(engine
            .commit(&patch(snapshot, vec![phone("+50688887777")]))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_with_lost_response_still_reports_changes() {
        let store = Arc::new(MemoryRecordStore::with_records([base()]));
        let engine = SyncEngine::new(
            store.clone(),
            SyncConfig {
                retry: RetryPolicy {
                    max_attempts: 2,
                    initial_backoff_ms: 10,
                    max_backoff_ms: 10,
                },
                max_merge_rounds: 3,
            },
        );
        let snapshot = engine.snapshot(&id()).await.unwrap();
        store.lose_next_write_acks(1);

        let outcome = engine
            .commit(&patch(snapshot, vec![phone("+50688887777")]))
            .await
            .unwrap();

        let CommitOutcome::Committed {
            version,
            changed_fields,
            before,
            after,
        } = outcome
        else {
            panic!("expected commit");
        };
        assert_eq!(version, RecordVersion::new(2));
        assert_eq!(changed_fields, vec![FieldKind::Phone]);
        assert_eq!(before, base());
        assert_eq!(after.get(FieldKind::Phone), phone("+50688887777"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_non_atomic_store_detects_lost_update() {
        let store = Arc::new(MemoryRecordStore::non_atomic());
        store.insert(base());
        let engine = engine(store.clone());
        let snapshot = engine.snapshot(&id()).await.unwrap();

        let mut clobber = base();
        clobber.set(phone("+50611112222"));
        store.overwrite_after_next_write(clobber);

        let outcome = engine
            .commit(&patch(snapshot, vec![phone("+50688887777")]))
            .await
            .unwrap();

        let CommitOutcome::Conflict(conflict) = outcome else {
            panic!("expected lost update");
        };
        assert!(conflict.lost_update);
        assert_eq!(conflict.fields[0].theirs, phone("+50611112222"));
        assert_eq!(conflict.remote.version, RecordVersion::new(3));
    }

    #[tokio::test]
    async fn test_non_atomic_store_without_interference_commits() {
        let store = Arc::new(MemoryRecordStore::non_atomic());
        store.insert(base());
        let engine = engine(store);
        let snapshot = engine.snapshot(&id()).await.unwrap();

        let outcome = engine
            .commit(&patch(snapshot, vec![phone("+50688887777")]))
            .await
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
    }
}
