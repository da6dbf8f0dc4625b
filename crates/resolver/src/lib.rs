//! Resolution engine and administrative permission model.
//!
//! This crate is the read/write API over the record store: `resolve` applies
//! TTL and visibility rules, `create`/`mutate` are gated by the delegated
//! permission bitstring resolved through each handle's administrative value.

pub mod engine;
pub mod errors;
pub mod permissions;

pub use engine::{
    AdminIdentity, EngineConfig, MutateOp, ResolutionEngine, ResolveFilter,
};
pub use errors::{ResolveError, Result};
pub use permissions::{effective_permissions, EffectiveAdmin};
