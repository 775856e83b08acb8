//! In-process stores with fault injection

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::{AssetRef, CompanyRecord, RecordId, RecordVersion, Snapshot};

use super::{photo_key, FileStore, RecordStore, StoreError, StoreResult, WriteOutcome};

#[derive(Debug, Default)]
struct RecordTable {
    rows: BTreeMap<RecordId, Snapshot>,
    failing_fetches: usize,
    failing_writes: usize,
    lost_write_acks: usize,
    before_next_write: Option<CompanyRecord>,
    after_next_write: Option<CompanyRecord>,
    writes: usize,
}

impl RecordTable {
    fn upsert(&mut self, record: CompanyRecord) -> RecordVersion {
        let version = self
            .rows
            .get(&record.id)
            .map_or(RecordVersion::INITIAL, |current| current.version.next());
        self.rows
            .insert(record.id.clone(), Snapshot::new(record, version));
        version
    }
}

/// Record store kept in memory.
///
/// Writes are atomic unless built with [`MemoryRecordStore::non_atomic`].
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    table: Mutex<RecordTable>,
    non_atomic: bool,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports non-atomic writes, like a spreadsheet.
    #[must_use]
    pub fn non_atomic() -> Self {
        Self {
            non_atomic: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = CompanyRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Insert or overwrite a record as an outside editor would, bumping its
    /// version. Returns the new version.
    pub fn insert(&self, record: CompanyRecord) -> RecordVersion {
        self.lock().upsert(record)
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Snapshot> {
        self.lock().rows.get(id).cloned()
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().failing_fetches = count;
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Apply the next `count` writes but answer them with a transient error,
    /// like a request whose response timed out.
    pub fn lose_next_write_acks(&self, count: usize) {
        self.lock().lost_write_acks = count;
    }

    /// Store `record` as a concurrent edit right before the next write
    /// compares versions.
    pub fn interleave_before_next_write(&self, record: CompanyRecord) {
        self.lock().before_next_write = Some(record);
    }

    /// Silently overwrite the row with `record` right after the next write
    /// succeeds, as a second writer racing a non-atomic store would.
    pub fn overwrite_after_next_write(&self, record: CompanyRecord) {
        self.lock().after_next_write = Some(record);
    }

    /// Number of successful writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, RecordTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scan(&self, keep: impl Fn(&CompanyRecord) -> bool) -> StoreResult<Vec<CompanyRecord>> {
        let mut table = self.lock();
        if table.failing_fetches > 0 {
            table.failing_fetches -= 1;
            return Err(StoreError::Unavailable("injected fetch failure".to_string()));
        }
        Ok(table
            .rows
            .values()
            .map(|snapshot| &snapshot.record)
            .filter(|record| keep(record))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch(&self, id: &RecordId) -> StoreResult<Snapshot> {
        let mut table = self.lock();
        if table.failing_fetches > 0 {
            table.failing_fetches -= 1;
            return Err(StoreError::Unavailable("injected fetch failure".to_string()));
        }
        table
            .rows
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn write(
        &self,
        id: &RecordId,
        record: &CompanyRecord,
        expected: RecordVersion,
    ) -> StoreResult<WriteOutcome> {
        let mut table = self.lock();
        if table.failing_writes > 0 {
            table.failing_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        if let Some(concurrent) = table.before_next_write.take() {
            table.upsert(concurrent);
        }

        let current = table
            .rows
            .get(id)
            .map(|snapshot| snapshot.version)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if current != expected {
            return Ok(WriteOutcome::VersionMismatch(current));
        }

        let version = expected.next();
        table
            .rows
            .insert(id.clone(), Snapshot::new(record.clone(), version));
        table.writes += 1;

        if let Some(clobber) = table.after_next_write.take() {
            table.upsert(clobber);
        }
        if table.lost_write_acks > 0 {
            table.lost_write_acks -= 1;
            return Err(StoreError::Unavailable("injected lost response".to_string()));
        }
        Ok(WriteOutcome::Written(version))
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Vec<CompanyRecord>> {
        self.scan(|record| record.name_matches(name))
    }

    async fn unfilled(&self) -> StoreResult<Vec<CompanyRecord>> {
        self.scan(|record| !record.missing_fields().is_empty())
    }

    fn atomic_writes(&self) -> bool {
        !self.non_atomic
    }
}

#[derive(Debug, Default)]
struct FileTable {
    objects: BTreeMap<String, Vec<u8>>,
    puts: usize,
    deletes: usize,
    failing_puts: usize,
    failing_deletes: usize,
}

/// File store kept in memory, keyed like the object store.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    table: Mutex<FileTable>,
}

impl MemoryFileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_puts(&self, count: usize) {
        self.lock().failing_puts = count;
    }

    pub fn fail_next_deletes(&self, count: usize) {
        self.lock().failing_deletes = count;
    }

    #[must_use]
    pub fn contains(&self, asset: &AssetRef) -> bool {
        self.lock().objects.contains_key(asset.as_str())
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful `put` calls, including no-op repeats.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.lock().puts
    }

    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.lock().deletes
    }

    fn lock(&self) -> MutexGuard<'_, FileTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(&self, bytes: &[u8], hash: &str, content_type: &str) -> StoreResult<AssetRef> {
        let mut table = self.lock();
        if table.failing_puts > 0 {
            table.failing_puts -= 1;
            return Err(StoreError::Unavailable("injected upload failure".to_string()));
        }

        let key = photo_key(hash, content_type);
        table
            .objects
            .entry(key.clone())
            .or_insert_with(|| bytes.to_vec());
        table.puts += 1;
        AssetRef::from_canonical(key).map_err(|reason| StoreError::Malformed(reason.to_string()))
    }

    async fn delete(&self, asset: &AssetRef) -> StoreResult<()> {
        let mut table = self.lock();
        if table.failing_deletes > 0 {
            table.failing_deletes -= 1;
            return Err(StoreError::Unavailable("injected delete failure".to_string()));
        }
        table.objects.remove(asset.as_str());
        table.deletes += 1;
        Ok(())
    }
}
