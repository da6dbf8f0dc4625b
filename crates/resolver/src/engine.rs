//! Resolution engine: the public read/write API over the record store.
//!
//! Reads (`resolve`) run against a consistent per-handle snapshot and never
//! block writes. Writes are serialized per handle through a sharded lock
//! table and executed on the blocking pool with a bounded timeout; a timeout
//! leaves the mutation in an ambiguous state that callers resolve by
//! re-checking via `resolve`.

use crate::errors::{ResolveError, Result};
use crate::permissions::effective_permissions;
use parking_lot::Mutex;
use pidgate_store::{RecordStore, StoreError};
use pidgate_types::{now_secs, Handle, Operation, Value};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const LOCK_SHARDS: usize = 64;

/// Engine tuning, supplied by the node configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Applied when a value carries `ttl == 0`.
    pub default_ttl: u32,
    /// Upper bound on any single durability write.
    pub store_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_ttl: 86_400,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Read-side filtering options.
#[derive(Debug, Clone, Default)]
pub struct ResolveFilter {
    pub value_type: Option<String>,
    pub index: Option<u32>,
    /// Administrative surface: include expired and non-public values.
    pub admin_visibility: bool,
}

/// The administrative record a caller claims to act under. Must name the
/// authority that the target handle's delegation actually resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub handle: Handle,
    pub index: u32,
}

/// A single mutating operation against one handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MutateOp {
    AddValue(Value),
    ModifyValue(Value),
    DeleteValue { index: u32 },
    AddAdmin(Value),
    ModifyAdmin(Value),
    DeleteAdmin { index: u32 },
    DeleteHandle,
}

impl MutateOp {
    /// Permission bit gating this operation.
    pub fn operation(&self) -> Operation {
        match self {
            MutateOp::AddValue(_) => Operation::AddValue,
            MutateOp::ModifyValue(_) => Operation::ModifyValue,
            MutateOp::DeleteValue { .. } => Operation::DeleteValue,
            MutateOp::AddAdmin(_) => Operation::AddAdmin,
            MutateOp::ModifyAdmin(_) => Operation::ModifyAdmin,
            MutateOp::DeleteAdmin { .. } => Operation::DeleteAdmin,
            MutateOp::DeleteHandle => Operation::DeleteHandle,
        }
    }
}

/// Public resolution and administration API.
#[derive(Clone)]
pub struct ResolutionEngine {
    store: Arc<dyn RecordStore>,
    config: EngineConfig,
    locks: Arc<Vec<Mutex<()>>>,
}

impl ResolutionEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        let locks = (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect();
        Self {
            store,
            config,
            locks: Arc::new(locks),
        }
    }

    /// Resolve a handle to its visible values, ascending by index.
    ///
    /// TTL and visibility rules apply unless the filter requests
    /// administrative visibility; type and index filters are exact matches,
    /// intersected. `NotFound` covers both a missing handle and a fully
    /// filtered-out one.
    pub fn resolve(&self, handle: &Handle, filter: &ResolveFilter) -> Result<Vec<Value>> {
        let record = self.store.get(handle).map_err(map_missing(handle))?;
        let now = now_secs();

        let mut values = Vec::new();
        for value in record.values.values() {
            if !filter.admin_visibility {
                if value.is_expired(self.config.default_ttl, now) {
                    continue;
                }
                if !value.perms.public_read {
                    continue;
                }
            }
            if let Some(wanted) = &filter.value_type {
                if &value.value_type != wanted {
                    continue;
                }
            }
            if let Some(wanted) = filter.index {
                if value.index != wanted {
                    continue;
                }
            }
            values.push(value.clone());
        }

        if values.is_empty() {
            return Err(ResolveError::NotFound {
                handle: handle.to_string(),
            });
        }
        Ok(values)
    }

    /// Create a handle with its initial value set. Exactly one
    /// administrative value is required and the creation is atomic.
    pub async fn create(&self, handle: &Handle, mut values: Vec<Value>) -> Result<u64> {
        for value in &values {
            value.validate()?;
        }
        let admin_count = values.iter().filter(|v| v.is_admin()).count();
        if admin_count != 1 {
            return Err(ResolveError::InvalidAdmin {
                reason: format!("expected exactly one administrative value, got {admin_count}"),
            });
        }
        for value in &mut values {
            value.stamp();
        }

        let target = handle.clone();
        let version = self
            .run_mutation(handle, move |store| {
                store.put_record(&target, values).map_err(|err| match err {
                    StoreError::AlreadyExists { handle } => ResolveError::AlreadyExists { handle },
                    other => ResolveError::Store(other),
                })
            })
            .await?;
        tracing::info!(handle = %handle, version, "handle created");
        Ok(version)
    }

    /// Apply one mutation under the permission model.
    ///
    /// The effective bitstring is resolved through the handle's delegation
    /// chain; the caller must name the authority record and the mapped
    /// operation bit must be set. Permission failures happen before any
    /// store write, so denials have no partial effect.
    pub async fn mutate(&self, handle: &Handle, op: MutateOp, caller: &AdminIdentity) -> Result<u64> {
        let operation = op.operation();
        let effective = effective_permissions(self.store.as_ref(), handle)?;

        if caller.handle != effective.authority || caller.index != effective.authority_index {
            tracing::warn!(handle = %handle, %operation, "caller does not hold the authority record");
            return Err(ResolveError::PermissionDenied { operation });
        }
        if !effective.allows(operation) {
            tracing::warn!(handle = %handle, %operation, "operation bit not granted");
            return Err(ResolveError::PermissionDenied { operation });
        }

        let target = handle.clone();
        let version = self
            .run_mutation(handle, move |store| apply_mutation(store, &target, op))
            .await?;
        tracing::debug!(handle = %handle, %operation, version, "mutation applied");
        Ok(version)
    }

    /// Per-handle version counter, for optimistic re-checks after a timeout.
    pub fn version(&self, handle: &Handle) -> Result<u64> {
        self.store.version(handle).map_err(map_missing(handle))
    }

    /// All stored handles (administrative listing).
    pub fn list_handles(&self) -> Result<Vec<Handle>> {
        let mut handles = self.store.list_handles()?;
        handles.sort();
        Ok(handles)
    }

    pub fn handle_count(&self) -> usize {
        self.store.list_handles().map(|h| h.len()).unwrap_or(0)
    }

    /// Serialize the mutation on the handle's lock shard and bound it with
    /// the configured store timeout. On timeout the write may still land;
    /// the caller treats the outcome as ambiguous.
    async fn run_mutation<F>(&self, handle: &Handle, mutation: F) -> Result<u64>
    where
        F: FnOnce(&dyn RecordStore) -> Result<u64> + Send + 'static,
    {
        let store = self.store.clone();
        let locks = self.locks.clone();
        let shard = shard_for(handle);
        let task = tokio::task::spawn_blocking(move || {
            let _guard = locks[shard].lock();
            mutation(store.as_ref())
        });

        match timeout(self.config.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ResolveError::Internal(join_err.to_string())),
            Err(_) => Err(ResolveError::StoreTimeout),
        }
    }
}

fn shard_for(handle: &Handle) -> usize {
    let mut hasher = DefaultHasher::new();
    handle.hash(&mut hasher);
    (hasher.finish() as usize) % LOCK_SHARDS
}

fn map_missing(handle: &Handle) -> impl FnOnce(StoreError) -> ResolveError {
    let handle = handle.to_string();
    move |err| match err {
        StoreError::NotFound { .. } => ResolveError::NotFound { handle },
        other => ResolveError::Store(other),
    }
}

/// The store-side half of a mutation, run under the handle's lock shard.
fn apply_mutation(store: &dyn RecordStore, handle: &Handle, op: MutateOp) -> Result<u64> {
    match op {
        MutateOp::AddValue(mut value) => {
            value.validate()?;
            if value.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "administrative values are added via add_admin".into(),
                });
            }
            if store.get(handle)?.values.contains_key(&value.index) {
                return Err(ResolveError::Store(StoreError::Conflict {
                    handle: handle.to_string(),
                    reason: format!("index {} already holds a value", value.index),
                }));
            }
            value.stamp();
            Ok(store.put_value(handle, value)?)
        }
        MutateOp::ModifyValue(mut value) => {
            value.validate()?;
            if value.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "administrative values are modified via modify_admin".into(),
                });
            }
            let existing = store.get_value(handle, value.index)?;
            if existing.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "target value is administrative; use modify_admin".into(),
                });
            }
            value.stamp();
            Ok(store.put_value(handle, value)?)
        }
        MutateOp::DeleteValue { index } => {
            let existing = store.get_value(handle, index)?;
            if existing.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "target value is administrative; use delete_admin".into(),
                });
            }
            Ok(store.delete_value(handle, index)?)
        }
        MutateOp::AddAdmin(mut value) => {
            value.validate()?;
            if !value.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "add_admin requires an administrative value".into(),
                });
            }
            if store.get(handle)?.values.contains_key(&value.index) {
                return Err(ResolveError::Store(StoreError::Conflict {
                    handle: handle.to_string(),
                    reason: format!("index {} already holds a value", value.index),
                }));
            }
            value.stamp();
            Ok(store.put_value(handle, value)?)
        }
        MutateOp::ModifyAdmin(mut value) => {
            value.validate()?;
            if !value.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "modify_admin requires an administrative value".into(),
                });
            }
            let existing = store.get_value(handle, value.index)?;
            if !existing.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "target value is not administrative".into(),
                });
            }
            value.stamp();
            Ok(store.put_value(handle, value)?)
        }
        MutateOp::DeleteAdmin { index } => {
            let existing = store.get_value(handle, index)?;
            if !existing.is_admin() {
                return Err(ResolveError::InvalidAdmin {
                    reason: "target value is not administrative".into(),
                });
            }
            Ok(store.delete_value(handle, index)?)
        }
        MutateOp::DeleteHandle => {
            store.delete_handle(handle)?;
            Ok(0)
        }
    }
}
