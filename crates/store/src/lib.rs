//! Durable record store for pidgate handles.
//!
//! One durable unit per handle: all of its values plus the administrative
//! record, keyed by the handle string. Every mutation advances a per-handle
//! version counter used for optimistic concurrency and cache invalidation.
//! The store knows nothing about HTTP or permission checking.

use parking_lot::RwLock;
use pidgate_types::{Handle, Value};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Store errors.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("handle not found: {handle}")]
    NotFound { handle: String },
    #[error("value not found: {handle} index {index}")]
    ValueNotFound { handle: String, index: u32 },
    #[error("handle already exists: {handle}")]
    AlreadyExists { handle: String },
    #[error("conflict on {handle}: {reason}")]
    Conflict { handle: String, reason: String },
    #[error("invariant violation on {handle}: {reason}")]
    InvariantViolation { handle: String, reason: String },
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// All state persisted for one handle.
///
/// `values` is keyed by value index, so iteration is ascending by index.
/// `retired` remembers indexes of deleted values; an index is never handed
/// back to a different value within the handle's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandleRecord {
    pub values: BTreeMap<u32, Value>,
    #[serde(default)]
    pub retired: BTreeSet<u32>,
    pub version: u64,
}

impl HandleRecord {
    fn admin_count(&self) -> usize {
        self.values.values().filter(|v| v.is_admin()).count()
    }
}

/// Abstract record store consumed by the resolution engine.
pub trait RecordStore: Send + Sync {
    /// Full record for a handle, values ascending by index.
    fn get(&self, handle: &Handle) -> Result<HandleRecord>;

    /// Single value by index.
    fn get_value(&self, handle: &Handle, index: u32) -> Result<Value>;

    /// Insert or replace the value at its index, creating the handle when the
    /// value is administrative. Returns the new version.
    fn put_value(&self, handle: &Handle, value: Value) -> Result<u64>;

    /// Atomically create a handle with its initial value set.
    fn put_record(&self, handle: &Handle, values: Vec<Value>) -> Result<u64>;

    /// Delete one value, retiring its index. Returns the new version.
    fn delete_value(&self, handle: &Handle, index: u32) -> Result<u64>;

    /// Remove the handle and all of its values atomically.
    fn delete_handle(&self, handle: &Handle) -> Result<()>;

    /// Current per-handle version counter.
    fn version(&self, handle: &Handle) -> Result<u64>;

    /// All stored handles (administrative listing).
    fn list_handles(&self) -> Result<Vec<Handle>>;
}

/// Shared mutation logic: the read-modify-write rules that both backends
/// apply to a record. `record` is `None` when the handle does not exist yet.
fn apply_put(
    handle: &Handle,
    record: Option<HandleRecord>,
    value: Value,
) -> Result<HandleRecord> {
    let mut record = match record {
        Some(record) => record,
        None => {
            // First-ever write must establish the administrative value.
            if !value.is_admin() {
                return Err(StoreError::Conflict {
                    handle: handle.to_string(),
                    reason: "handle does not exist and value is not administrative".into(),
                });
            }
            HandleRecord::default()
        }
    };

    if record.retired.contains(&value.index) {
        return Err(StoreError::Conflict {
            handle: handle.to_string(),
            reason: format!("index {} was retired and cannot be reused", value.index),
        });
    }

    let replaced = record.values.insert(value.index, value);
    if replaced.is_some_and(|old| old.is_admin()) && record.admin_count() == 0 {
        return Err(StoreError::InvariantViolation {
            handle: handle.to_string(),
            reason: "replacement would leave the handle without an administrative value".into(),
        });
    }

    record.version += 1;
    Ok(record)
}

/// Build the initial record for an atomic create. Indexes must be unique
/// across the submitted set; collapsing duplicates would silently drop data.
fn build_record(handle: &Handle, values: Vec<Value>) -> Result<HandleRecord> {
    let mut map = BTreeMap::new();
    for value in values {
        let index = value.index;
        if map.insert(index, value).is_some() {
            return Err(StoreError::Conflict {
                handle: handle.to_string(),
                reason: format!("duplicate index {index} in initial value set"),
            });
        }
    }
    Ok(HandleRecord {
        values: map,
        retired: BTreeSet::new(),
        version: 1,
    })
}

/// Shared deletion logic. Returns the updated record, or `None` when the
/// last value was removed and the handle should disappear entirely.
fn apply_delete(
    handle: &Handle,
    mut record: HandleRecord,
    index: u32,
) -> Result<Option<HandleRecord>> {
    let target = record
        .values
        .get(&index)
        .ok_or_else(|| StoreError::ValueNotFound {
            handle: handle.to_string(),
            index,
        })?;

    if target.is_admin() && record.admin_count() == 1 && record.values.len() > 1 {
        return Err(StoreError::InvariantViolation {
            handle: handle.to_string(),
            reason: "cannot delete the last administrative value while other values remain".into(),
        });
    }

    record.values.remove(&index);
    if record.values.is_empty() {
        // A handle with zero values is not resolvable; drop it outright.
        return Ok(None);
    }
    record.retired.insert(index);
    record.version += 1;
    Ok(Some(record))
}

/// Sled-backed durable store: one tree, key = handle string, value =
/// JSON-encoded [`HandleRecord`], flushed after every mutation.
pub struct SledRecordStore {
    db: Db,
    records: Tree,
}

impl SledRecordStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let records = db.open_tree("records")?;
        Ok(Self { db, records })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read(&self, handle: &Handle) -> Result<Option<HandleRecord>> {
        self.records
            .get(handle.to_string().as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(Into::into)
    }

    fn write(&self, handle: &Handle, record: &HandleRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.records.insert(handle.to_string().as_bytes(), bytes)?;
        self.records.flush()?;
        Ok(())
    }
}

impl RecordStore for SledRecordStore {
    fn get(&self, handle: &Handle) -> Result<HandleRecord> {
        self.read(handle)?.ok_or_else(|| StoreError::NotFound {
            handle: handle.to_string(),
        })
    }

    fn get_value(&self, handle: &Handle, index: u32) -> Result<Value> {
        self.get(handle)?
            .values
            .get(&index)
            .cloned()
            .ok_or_else(|| StoreError::ValueNotFound {
                handle: handle.to_string(),
                index,
            })
    }

    fn put_value(&self, handle: &Handle, value: Value) -> Result<u64> {
        let record = apply_put(handle, self.read(handle)?, value)?;
        self.write(handle, &record)?;
        tracing::debug!(handle = %handle, version = record.version, "value stored");
        Ok(record.version)
    }

    fn put_record(&self, handle: &Handle, values: Vec<Value>) -> Result<u64> {
        if self.read(handle)?.is_some() {
            return Err(StoreError::AlreadyExists {
                handle: handle.to_string(),
            });
        }
        let record = build_record(handle, values)?;
        self.write(handle, &record)?;
        tracing::info!(handle = %handle, values = record.values.len(), "handle created");
        Ok(record.version)
    }

    fn delete_value(&self, handle: &Handle, index: u32) -> Result<u64> {
        let record = self.get(handle)?;
        match apply_delete(handle, record, index)? {
            Some(record) => {
                self.write(handle, &record)?;
                Ok(record.version)
            }
            None => {
                self.records.remove(handle.to_string().as_bytes())?;
                self.records.flush()?;
                tracing::info!(handle = %handle, "last value removed, handle dropped");
                Ok(0)
            }
        }
    }

    fn delete_handle(&self, handle: &Handle) -> Result<()> {
        let removed = self.records.remove(handle.to_string().as_bytes())?;
        if removed.is_none() {
            return Err(StoreError::NotFound {
                handle: handle.to_string(),
            });
        }
        self.records.flush()?;
        tracing::info!(handle = %handle, "handle deleted");
        Ok(())
    }

    fn version(&self, handle: &Handle) -> Result<u64> {
        Ok(self.get(handle)?.version)
    }

    fn list_handles(&self) -> Result<Vec<Handle>> {
        let mut handles = Vec::new();
        for entry in self.records.iter() {
            let (key, _) = entry?;
            let raw = String::from_utf8_lossy(&key);
            if let Ok(handle) = Handle::parse(&raw) {
                handles.push(handle);
            }
        }
        Ok(handles)
    }
}

/// In-memory store for tests and development.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Handle, HandleRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, handle: &Handle) -> Result<HandleRecord> {
        self.records
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                handle: handle.to_string(),
            })
    }

    fn get_value(&self, handle: &Handle, index: u32) -> Result<Value> {
        self.get(handle)?
            .values
            .get(&index)
            .cloned()
            .ok_or_else(|| StoreError::ValueNotFound {
                handle: handle.to_string(),
                index,
            })
    }

    fn put_value(&self, handle: &Handle, value: Value) -> Result<u64> {
        let mut records = self.records.write();
        let record = apply_put(handle, records.get(handle).cloned(), value)?;
        let version = record.version;
        records.insert(handle.clone(), record);
        Ok(version)
    }

    fn put_record(&self, handle: &Handle, values: Vec<Value>) -> Result<u64> {
        let mut records = self.records.write();
        if records.contains_key(handle) {
            return Err(StoreError::AlreadyExists {
                handle: handle.to_string(),
            });
        }
        let record = build_record(handle, values)?;
        records.insert(handle.clone(), record);
        Ok(1)
    }

    fn delete_value(&self, handle: &Handle, index: u32) -> Result<u64> {
        let mut records = self.records.write();
        let record = records.get(handle).cloned().ok_or_else(|| StoreError::NotFound {
            handle: handle.to_string(),
        })?;
        match apply_delete(handle, record, index)? {
            Some(record) => {
                let version = record.version;
                records.insert(handle.clone(), record);
                Ok(version)
            }
            None => {
                records.remove(handle);
                Ok(0)
            }
        }
    }

    fn delete_handle(&self, handle: &Handle) -> Result<()> {
        if self.records.write().remove(handle).is_none() {
            return Err(StoreError::NotFound {
                handle: handle.to_string(),
            });
        }
        Ok(())
    }

    fn version(&self, handle: &Handle) -> Result<u64> {
        Ok(self.get(handle)?.version)
    }

    fn list_handles(&self) -> Result<Vec<Handle>> {
        Ok(self.records.read().keys().cloned().collect())
    }
}
