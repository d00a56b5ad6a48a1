//! Task collection persistence on top of a [`KeyValueStore`].
//!
//! # Responsibility
//! - Save the whole task collection as one JSON array under the primary key.
//! - Keep exactly one backup generation of the previous primary value.
//! - Detect unreadable data on load, recover from the backup when it is
//!   readable and quarantine the bytes otherwise.
//!
//! # Invariants
//! - A failed save never leaves the primary key worse off than before.
//! - Load tries at most twice: the original read plus one read after a
//!   backup restore.
//! - Individual invalid records are skipped, never fatal to a load.

pub mod kv;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::task::{format_timestamp, now, Task, TaskRecord};

pub use kv::{FileStore, KeyValueStore, KvError, MemoryStore};

pub const PRIMARY_KEY: &str = "taskboard_tasks";
pub const BACKUP_KEY: &str = "taskboard_tasks_backup";
pub const LAST_SAVE_KEY: &str = "taskboard_last_save";
pub const QUARANTINE_PREFIX: &str = "taskboard_corrupted_";
const PROBE_KEY: &str = "taskboard_probe";

/// Conservative ceiling for local key-value storage.
pub const DEFAULT_CAPACITY_BYTES: usize = 5 * 1024 * 1024;

const MAX_LOAD_ATTEMPTS: usize = 2;

/// Errors surfaced by [`TaskStore`] when no internal recovery applied.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] KvError),

    #[error("storage full: {bytes} bytes do not fit even after cleanup")]
    CapacityExceeded { bytes: usize },

    #[error("save failed: {0}")]
    Write(#[source] KvError),

    #[error("could not encode tasks: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupted task data: {0}")]
    CorruptionDetected(String),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// What load had to do to produce a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// The primary value was unreadable and the backup replaced it.
    RestoredFromBackup,
    /// The unreadable bytes were moved to `key` and the primary cleared.
    Quarantined { key: String },
    /// The unreadable bytes could not be moved aside; the primary was left
    /// as is and the collection starts empty.
    QuarantineFailed,
}

/// Result of a load: the tasks plus what was dropped or repaired on the way.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub tasks: Vec<Task>,
    pub skipped: usize,
    pub recovery: Option<Recovery>,
}

/// Informational storage usage figures.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
    pub bytes: usize,
    pub capacity: usize,
    pub percent_used: f64,
    pub last_save: Option<DateTime<Utc>>,
}

#[derive(Error, Debug)]
enum Corruption {
    #[error("unparseable JSON: {0}")]
    Unparseable(#[from] serde_json::Error),

    #[error("expected an array, found {0}")]
    NotASequence(&'static str),
}

/// A failed write of one save generation.
struct GenerationError {
    source: KvError,
    /// The backup key received the pre-save primary during this attempt.
    backed_up: bool,
}

/// Persistence for the full task collection.
pub struct TaskStore<S: KeyValueStore> {
    kv: S,
    capacity: usize,
}

impl<S: KeyValueStore> TaskStore<S> {
    pub fn new(kv: S) -> Self {
        Self::with_capacity(kv, DEFAULT_CAPACITY_BYTES)
    }

    /// `capacity` only feeds [`TaskStore::storage_stats`]; the backend
    /// enforces its own limit.
    pub fn with_capacity(kv: S, capacity: usize) -> Self {
        Self { kv, capacity }
    }

    pub fn backend(&self) -> &S {
        &self.kv
    }

    /// Write/delete probe. `false` means callers should run memory-only.
    pub fn is_available(&mut self) -> bool {
        let probe = self
            .kv
            .set(PROBE_KEY, b"probe")
            .and_then(|()| self.kv.remove(PROBE_KEY));
        match probe {
            Ok(()) => true,
            Err(err) => {
                warn!("event=storage_probe module=store status=unavailable error={err}");
                false
            }
        }
    }

    /// Persist `tasks` as the new primary generation.
    ///
    /// The previous primary value is copied to the backup key first. A full
    /// store triggers one cleanup pass and one retry. Any other failure
    /// restores the primary from the backup taken by this call.
    pub fn save_tasks(&mut self, tasks: &[Task]) -> Result<(), StoreError> {
        let records: Vec<TaskRecord> = tasks.iter().map(Task::to_record).collect();
        let blob = serde_json::to_vec(&records)?;

        if let Err(first) = self.write_generation(&blob) {
            if !first.source.is_capacity() {
                return Err(self.rollback(first));
            }
            warn!(
                "event=save_capacity_exceeded module=store bytes={} action=cleanup",
                blob.len()
            );
            let removed = self.cleanup()?;
            if let Err(second) = self.write_generation(&blob) {
                if second.source.is_capacity() {
                    error!(
                        "event=save_failed module=store reason=capacity bytes={} cleaned={}",
                        blob.len(),
                        removed
                    );
                    return Err(StoreError::CapacityExceeded { bytes: blob.len() });
                }
                return Err(self.rollback(second));
            }
        }

        if let Err(err) = self.kv.set(LAST_SAVE_KEY, format_timestamp(now()).as_bytes()) {
            warn!("event=last_save_marker module=store status=error error={err}");
        }
        info!(
            "event=save module=store status=ok tasks={} bytes={}",
            tasks.len(),
            blob.len()
        );
        Ok(())
    }

    fn write_generation(&mut self, blob: &[u8]) -> Result<(), GenerationError> {
        let current = self.kv.get(PRIMARY_KEY).map_err(|source| GenerationError {
            source,
            backed_up: false,
        })?;
        let backed_up = match current {
            Some(previous) => {
                self.kv
                    .set(BACKUP_KEY, &previous)
                    .map_err(|source| GenerationError {
                        source,
                        backed_up: false,
                    })?;
                true
            }
            None => false,
        };
        self.kv
            .set(PRIMARY_KEY, blob)
            .map_err(|source| GenerationError { source, backed_up })
    }

    fn rollback(&mut self, failure: GenerationError) -> StoreError {
        error!(
            "event=save_failed module=store reason=write error={}",
            failure.source
        );
        if failure.backed_up {
            let restored = self
                .kv
                .get(BACKUP_KEY)
                .and_then(|backup| match backup {
                    Some(bytes) => self.kv.set(PRIMARY_KEY, &bytes).map(|()| true),
                    None => Ok(false),
                });
            match restored {
                Ok(true) => info!("event=primary_restored module=store source=backup"),
                Ok(false) => {}
                Err(err) => error!("event=primary_restore module=store status=error error={err}"),
            }
        }
        StoreError::Write(failure.source)
    }

    /// Remove the backup and every quarantine entry. Returns how many keys
    /// were removed. Never touches the primary collection.
    pub fn cleanup(&mut self) -> Result<usize, KvError> {
        let stale: Vec<String> = self
            .kv
            .keys()?
            .into_iter()
            .filter(|key| key == BACKUP_KEY || key.starts_with(QUARANTINE_PREFIX))
            .collect();
        for key in &stale {
            self.kv.remove(key)?;
        }
        info!("event=cleanup module=store removed={}", stale.len());
        Ok(stale.len())
    }

    pub fn load_tasks(&mut self) -> Result<Vec<Task>, StoreError> {
        Ok(self.load_report()?.tasks)
    }

    /// Load the collection, repairing unreadable data where possible.
    pub fn load_report(&mut self) -> Result<LoadReport, StoreError> {
        let mut recovery = None;

        for attempt in 1..=MAX_LOAD_ATTEMPTS {
            let Some(raw) = self.kv.get(PRIMARY_KEY)? else {
                debug!("event=load module=store status=empty");
                return Ok(LoadReport {
                    recovery,
                    ..LoadReport::default()
                });
            };

            match parse_collection(&raw) {
                Ok(values) => {
                    let (tasks, skipped) = rebuild(values);
                    if skipped > 0 {
                        warn!(
                            "event=load module=store status=partial loaded={} skipped={}",
                            tasks.len(),
                            skipped
                        );
                    } else {
                        info!("event=load module=store status=ok loaded={}", tasks.len());
                    }
                    return Ok(LoadReport {
                        tasks,
                        skipped,
                        recovery,
                    });
                }
                Err(reason) => {
                    warn!(
                        "event=corruption_detected module=store attempt={attempt} reason={reason}"
                    );
                    if attempt < MAX_LOAD_ATTEMPTS && self.restore_from_backup()? {
                        recovery = Some(Recovery::RestoredFromBackup);
                        continue;
                    }
                    return Ok(LoadReport {
                        recovery: Some(self.quarantine(&raw)),
                        ..LoadReport::default()
                    });
                }
            }
        }

        Ok(LoadReport {
            recovery,
            ..LoadReport::default()
        })
    }

    fn restore_from_backup(&mut self) -> Result<bool, KvError> {
        let Some(backup) = self.kv.get(BACKUP_KEY)? else {
            return Ok(false);
        };
        if let Err(reason) = parse_collection(&backup) {
            warn!("event=backup_unusable module=store reason={reason}");
            return Ok(false);
        }
        match self.kv.set(PRIMARY_KEY, &backup) {
            Ok(()) => {
                warn!("event=primary_restored module=store source=backup");
                Ok(true)
            }
            Err(err) => {
                warn!("event=primary_restore module=store status=error error={err}");
                Ok(false)
            }
        }
    }

    fn quarantine(&mut self, raw: &[u8]) -> Recovery {
        let key = match self.quarantine_key() {
            Ok(key) => key,
            Err(err) => {
                error!("event=quarantine module=store status=error error={err}");
                return Recovery::QuarantineFailed;
            }
        };
        if let Err(err) = self.kv.set(&key, raw) {
            error!("event=quarantine module=store status=error key={key} error={err}");
            return Recovery::QuarantineFailed;
        }
        if let Err(err) = self.kv.remove(PRIMARY_KEY) {
            error!("event=primary_clear module=store status=error error={err}");
        }
        warn!(
            "event=quarantine module=store status=ok key={key} bytes={}",
            raw.len()
        );
        Recovery::Quarantined { key }
    }

    fn quarantine_key(&self) -> Result<String, KvError> {
        let base = format!("{QUARANTINE_PREFIX}{}", now().format("%Y%m%dT%H%M%S%3fZ"));
        let existing = self.kv.keys()?;
        let mut key = base.clone();
        let mut n = 1;
        while existing.contains(&key) {
            key = format!("{base}-{n}");
            n += 1;
        }
        Ok(key)
    }

    pub fn quarantined_keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self
            .kv
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(QUARANTINE_PREFIX))
            .collect())
    }

    pub fn storage_stats(&self) -> Result<StorageStats, StoreError> {
        let bytes = self.kv.get(PRIMARY_KEY)?.map_or(0, |v| v.len());
        let last_save = self
            .kv
            .get(LAST_SAVE_KEY)?
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|ts| ts.with_timezone(&Utc));
        let percent_used = if self.capacity == 0 {
            0.0
        } else {
            bytes as f64 / self.capacity as f64 * 100.0
        };
        Ok(StorageStats {
            bytes,
            capacity: self.capacity,
            percent_used,
            last_save,
        })
    }
}

fn parse_collection(raw: &[u8]) -> Result<Vec<Value>, Corruption> {
    match serde_json::from_slice::<Value>(raw)? {
        Value::Array(values) => Ok(values),
        Value::Null => Err(Corruption::NotASequence("null")),
        Value::Bool(_) => Err(Corruption::NotASequence("a boolean")),
        Value::Number(_) => Err(Corruption::NotASequence("a number")),
        Value::String(_) => Err(Corruption::NotASequence("a string")),
        Value::Object(_) => Err(Corruption::NotASequence("an object")),
    }
}

/// Rebuild tasks one record at a time. Returns the tasks and the number of
/// records that failed validation.
pub(crate) fn rebuild(values: Vec<Value>) -> (Vec<Task>, usize) {
    let mut tasks = Vec::with_capacity(values.len());
    let mut skipped = 0;
    for (index, value) in values.into_iter().enumerate() {
        match Task::from_record(value) {
            Ok(task) => tasks.push(task),
            Err(err) => {
                skipped += 1;
                warn!(
                    "event=task_skipped module=store index={index} field={} error={err}",
                    err.field()
                );
            }
        }
    }
    (tasks, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskInput;
    use serde_json::json;
    use std::io;

    fn sample(titles: &[&str]) -> Vec<Task> {
        titles
            .iter()
            .map(|t| Task::new(TaskInput::new(*t).tags(["home"]).subtask("first step")).unwrap())
            .collect()
    }

    fn encoded(tasks: &[Task]) -> Vec<u8> {
        let records: Vec<TaskRecord> = tasks.iter().map(Task::to_record).collect();
        serde_json::to_vec(&records).unwrap()
    }

    /// Memory store with switchable faults.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        unavailable: bool,
        fail_primary_once: bool,
    }

    impl KeyValueStore for FaultyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
            if self.unavailable {
                return Err(KvError::Unavailable("disabled".into()));
            }
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &[u8]) -> Result<(), KvError> {
            if self.unavailable {
                return Err(KvError::Unavailable("disabled".into()));
            }
            if key == PRIMARY_KEY && self.fail_primary_once {
                self.fail_primary_once = false;
                return Err(KvError::Io(io::Error::other("disk hiccup")));
            }
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), KvError> {
            if self.unavailable {
                return Err(KvError::Unavailable("disabled".into()));
            }
            self.inner.remove(key)
        }

        fn keys(&self) -> Result<Vec<String>, KvError> {
            self.inner.keys()
        }
    }

    #[test]
    fn load_from_empty_store_is_empty() {
        let mut store = TaskStore::new(MemoryStore::new());
        let report = store.load_report().unwrap();
        assert!(report.tasks.is_empty());
        assert_eq!(report.skipped, 0);
        assert_eq!(report.recovery, None);
    }

    #[test]
    fn save_then_load_returns_same_tasks() {
        let tasks = sample(&["a", "b", "c"]);
        let mut store = TaskStore::new(MemoryStore::new());
        store.save_tasks(&tasks).unwrap();
        assert_eq!(store.load_tasks().unwrap(), tasks);
    }

    #[test]
    fn save_keeps_one_backup_generation_and_marker() {
        let first = sample(&["a"]);
        let second = sample(&["b"]);
        let third = sample(&["c"]);
        let mut store = TaskStore::new(MemoryStore::new());

        store.save_tasks(&first).unwrap();
        assert_eq!(store.backend().get(BACKUP_KEY).unwrap(), None);

        store.save_tasks(&second).unwrap();
        store.save_tasks(&third).unwrap();
        assert_eq!(
            store.backend().get(BACKUP_KEY).unwrap(),
            Some(encoded(&second))
        );
        assert_eq!(
            store.backend().get(PRIMARY_KEY).unwrap(),
            Some(encoded(&third))
        );
        assert_eq!(
            store.backend().keys().unwrap(),
            [LAST_SAVE_KEY, PRIMARY_KEY, BACKUP_KEY]
        );
        assert!(store.storage_stats().unwrap().last_save.is_some());
    }

    #[test]
    fn corrupted_primary_is_restored_from_backup() {
        let backup = sample(&["one", "two"]);
        let mut kv = MemoryStore::new();
        kv.set(PRIMARY_KEY, b"[{\"id\": broken").unwrap();
        kv.set(BACKUP_KEY, &encoded(&backup)).unwrap();

        let mut store = TaskStore::new(kv);
        let report = store.load_report().unwrap();
        assert_eq!(report.tasks, backup);
        assert_eq!(report.recovery, Some(Recovery::RestoredFromBackup));
        assert_eq!(
            store.backend().get(PRIMARY_KEY).unwrap(),
            store.backend().get(BACKUP_KEY).unwrap()
        );
    }

    #[test]
    fn unrecoverable_primary_is_quarantined() {
        let mut kv = MemoryStore::new();
        kv.set(PRIMARY_KEY, b"not json").unwrap();
        kv.set(BACKUP_KEY, b"{\"also\": \"bad\"").unwrap();

        let mut store = TaskStore::new(kv);
        let report = store.load_report().unwrap();
        assert!(report.tasks.is_empty());
        let Some(Recovery::Quarantined { key }) = report.recovery else {
            panic!("expected quarantine, got {:?}", report.recovery);
        };
        assert!(key.starts_with(QUARANTINE_PREFIX));
        assert_eq!(
            store.backend().get(&key).unwrap().as_deref(),
            Some(&b"not json"[..])
        );
        assert_eq!(store.backend().get(PRIMARY_KEY).unwrap(), None);
        assert_eq!(store.quarantined_keys().unwrap(), [key]);

        // A later quarantine never overwrites an earlier one.
        store.quarantine(b"again");
        assert_eq!(store.quarantined_keys().unwrap().len(), 2);
    }

    #[test]
    fn non_array_primary_counts_as_corruption() {
        let mut kv = MemoryStore::new();
        kv.set(PRIMARY_KEY, br#"{"tasks": []}"#).unwrap();
        let mut store = TaskStore::new(kv);
        let report = store.load_report().unwrap();
        assert!(report.tasks.is_empty());
        assert!(matches!(report.recovery, Some(Recovery::Quarantined { .. })));
    }

    #[test]
    fn invalid_records_are_skipped_individually() {
        let good = sample(&["first", "third"]);
        let mut values: Vec<Value> = good
            .iter()
            .map(|t| serde_json::to_value(t.to_record()).unwrap())
            .collect();
        values.insert(1, json!({"title": "second", "status": "archived"}));

        let mut kv = MemoryStore::new();
        kv.set(PRIMARY_KEY, &serde_json::to_vec(&values).unwrap())
            .unwrap();
        let mut store = TaskStore::new(kv);
        let report = store.load_report().unwrap();
        assert_eq!(report.tasks, good);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.recovery, None);
    }

    #[test]
    fn capacity_failure_without_reclaimable_space_keeps_previous_save() {
        let a = sample(&["a"]);
        let b = sample(&["b", "c", "d", "e"]);

        let mut sizing = TaskStore::new(MemoryStore::new());
        sizing.save_tasks(&a).unwrap();
        let capacity = sizing.backend().used_bytes() + 16;

        let mut store = TaskStore::new(MemoryStore::with_capacity(capacity));
        store.save_tasks(&a).unwrap();
        let err = store.save_tasks(&b).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { .. }));
        assert_eq!(store.backend().get(PRIMARY_KEY).unwrap(), Some(encoded(&a)));
        assert_eq!(store.load_tasks().unwrap(), a);
    }

    #[test]
    fn capacity_failure_retries_after_cleanup() {
        let tasks = sample(&["a", "b"]);
        let size = encoded(&tasks).len();
        let mut kv = MemoryStore::with_capacity(size + 2048);
        let junk_key = format!("{QUARANTINE_PREFIX}20200101T000000000Z");
        kv.set(&junk_key, &vec![b'x'; 2000]).unwrap();

        let mut store = TaskStore::new(kv);
        store.save_tasks(&tasks).unwrap();
        assert_eq!(store.backend().get(&junk_key).unwrap(), None);
        assert_eq!(store.load_tasks().unwrap(), tasks);
    }

    #[test]
    fn unexpected_write_error_restores_primary() {
        let a = sample(&["a"]);
        let mut store = TaskStore::new(FaultyStore::default());
        store.save_tasks(&a).unwrap();

        store.kv.fail_primary_once = true;
        let err = store.save_tasks(&sample(&["b"])).unwrap_err();
        assert!(matches!(err, StoreError::Write(KvError::Io(_))));
        assert_eq!(store.load_tasks().unwrap(), a);
    }

    #[test]
    fn availability_probe_leaves_no_trace() {
        let mut store = TaskStore::new(MemoryStore::new());
        assert!(store.is_available());
        assert!(store.backend().keys().unwrap().is_empty());

        let mut down = TaskStore::new(FaultyStore {
            unavailable: true,
            ..FaultyStore::default()
        });
        assert!(!down.is_available());
        assert!(down.save_tasks(&sample(&["a"])).is_err());
    }

    #[test]
    fn stats_report_primary_size() {
        let tasks = sample(&["a"]);
        let mut store = TaskStore::with_capacity(MemoryStore::new(), 1000);
        let empty = store.storage_stats().unwrap();
        assert_eq!(empty.bytes, 0);
        assert_eq!(empty.last_save, None);

        store.save_tasks(&tasks).unwrap();
        let stats = store.storage_stats().unwrap();
        assert_eq!(stats.bytes, encoded(&tasks).len());
        assert_eq!(stats.capacity, 1000);
        assert!((stats.percent_used - stats.bytes as f64 / 10.0).abs() < 1e-9);
        assert!(stats.last_save.is_some());
    }

    #[test]
    fn cleanup_never_touches_primary() {
        let tasks = sample(&["a"]);
        let mut store = TaskStore::new(MemoryStore::new());
        store.save_tasks(&tasks).unwrap();
        store.save_tasks(&tasks).unwrap();
        store
            .kv
            .set(&format!("{QUARANTINE_PREFIX}20240101T000000000Z"), b"junk")
            .unwrap();
        assert_eq!(store.cleanup().unwrap(), 2);
        assert_eq!(store.quarantined_keys().unwrap(), Vec::<String>::new());
        assert_eq!(store.kv.get(BACKUP_KEY).unwrap(), None);
        assert_eq!(store.load_tasks().unwrap(), tasks);
    }
}
