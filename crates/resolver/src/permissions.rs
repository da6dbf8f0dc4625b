//! Administrative permission model.
//!
//! A handle does not own its permission bits: its administrative value names
//! another handle's value (`referenced_handle[referenced_index]`), and the
//! bitstring found there governs the handle. The reference is followed
//! exactly one hop, never transitively, which bounds recursion and keeps the
//! check O(2) store reads.

use crate::errors::{ResolveError, Result};
use pidgate_store::{RecordStore, StoreError};
use pidgate_types::{Handle, Operation, PermissionSet};

/// The resolved authority for a handle: where the governing bitstring lives
/// and what it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAdmin {
    pub authority: Handle,
    pub authority_index: u32,
    pub permissions: PermissionSet,
}

impl EffectiveAdmin {
    pub fn allows(&self, op: Operation) -> bool {
        self.permissions.allows(op)
    }
}

/// Resolve the effective permission set for `handle` by following its
/// administrative delegation one hop.
pub fn effective_permissions(store: &dyn RecordStore, handle: &Handle) -> Result<EffectiveAdmin> {
    let record = store.get(handle).map_err(|err| match err {
        StoreError::NotFound { handle } => ResolveError::NotFound { handle },
        other => ResolveError::Store(other),
    })?;

    let admin = record
        .values
        .values()
        .find(|v| v.is_admin())
        .ok_or_else(|| ResolveError::AdminChainBroken {
            handle: handle.to_string(),
            reason: "handle has no administrative value".into(),
        })?;

    let reference = admin
        .admin_record()
        .ok_or_else(|| ResolveError::AdminChainBroken {
            handle: handle.to_string(),
            reason: "administrative value carries no administrative payload".into(),
        })?;

    let referenced = store
        .get_value(&reference.referenced_handle, reference.referenced_index)
        .map_err(|_| ResolveError::AdminChainBroken {
            handle: handle.to_string(),
            reason: format!(
                "reference {}[{}] does not resolve",
                reference.referenced_handle, reference.referenced_index
            ),
        })?;

    let authority_record =
        referenced
            .admin_record()
            .ok_or_else(|| ResolveError::AdminChainBroken {
                handle: handle.to_string(),
                reason: "referenced value is not administrative".into(),
            })?;

    Ok(EffectiveAdmin {
        authority: reference.referenced_handle.clone(),
        authority_index: reference.referenced_index,
        permissions: authority_record.permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pidgate_store::MemoryRecordStore;
    use pidgate_types::{AdminRecord, Value};

    fn handle(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    fn admin(index: u32, referenced: &str, referenced_index: u32, bits: &str) -> Value {
        Value::admin(
            index,
            AdminRecord {
                referenced_handle: handle(referenced),
                referenced_index,
                permissions: PermissionSet::from_bitstring(bits).unwrap(),
            },
        )
    }

    /// Authority record at 0.NA/10.123 index 200, plus an item whose admin
    /// value delegates to it.
    fn seed(store: &MemoryRecordStore, authority_bits: &str, item_bits: &str) {
        store
            .put_record(
                &handle("0.NA/10.123"),
                vec![admin(200, "0.NA/10.123", 200, authority_bits)],
            )
            .unwrap();
        store
            .put_record(
                &handle("10.123/item.1"),
                vec![
                    Value::text(1, "URL", "https://example.org"),
                    admin(100, "0.NA/10.123", 200, item_bits),
                ],
            )
            .unwrap();
    }

    #[test]
    fn effective_bits_come_from_referenced_record() {
        let store = MemoryRecordStore::new();
        // The item's own bitstring grants nothing; the authority's grants all.
        seed(&store, "111111111111", "000000000000");
        let effective = effective_permissions(&store, &handle("10.123/item.1")).unwrap();
        assert_eq!(effective.authority, handle("0.NA/10.123"));
        assert_eq!(effective.authority_index, 200);
        assert!(effective.allows(Operation::AddValue));
        assert!(effective.allows(Operation::DeleteHandle));
    }

    #[test]
    fn broken_reference_is_reported() {
        let store = MemoryRecordStore::new();
        store
            .put_record(
                &handle("10.123/orphan"),
                vec![admin(100, "0.NA/9.999", 1, "111111111111")],
            )
            .unwrap();
        let err = effective_permissions(&store, &handle("10.123/orphan")).unwrap_err();
        assert!(matches!(err, ResolveError::AdminChainBroken { .. }));
    }

    #[test]
    fn referenced_value_must_be_administrative() {
        let store = MemoryRecordStore::new();
        store
            .put_record(
                &handle("0.NA/10.123"),
                vec![
                    Value::text(1, "URL", "https://example.org"),
                    admin(200, "0.NA/10.123", 200, "111111111111"),
                ],
            )
            .unwrap();
        // Delegates to index 1, a plain URL value.
        store
            .put_record(
                &handle("10.123/bad"),
                vec![admin(100, "0.NA/10.123", 1, "111111111111")],
            )
            .unwrap();
        let err = effective_permissions(&store, &handle("10.123/bad")).unwrap_err();
        assert!(matches!(err, ResolveError::AdminChainBroken { .. }));
    }

    #[test]
    fn missing_handle_is_not_found() {
        let store = MemoryRecordStore::new();
        let err = effective_permissions(&store, &handle("10.123/nothing")).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn resolution_is_one_hop_only() {
        let store = MemoryRecordStore::new();
        // root grants everything; mid delegates to root but its own local
        // bitstring denies everything; leaf delegates to mid.
        store
            .put_record(
                &handle("0.NA/root"),
                vec![admin(200, "0.NA/root", 200, "111111111111")],
            )
            .unwrap();
        store
            .put_record(
                &handle("0.NA/mid"),
                vec![admin(100, "0.NA/root", 200, "000000000000")],
            )
            .unwrap();
        store
            .put_record(
                &handle("10.123/leaf"),
                vec![admin(100, "0.NA/mid", 100, "000000000000")],
            )
            .unwrap();

        // The leaf's effective bits are read from mid[100] itself, not from
        // whatever mid delegates to.
        let effective = effective_permissions(&store, &handle("10.123/leaf")).unwrap();
        assert_eq!(effective.authority, handle("0.NA/mid"));
        assert!(!effective.allows(Operation::AddValue));
    }
}
