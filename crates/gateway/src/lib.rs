//! Gateway adapter: the single entry point consumed by the external HTTP
//! front end.
//!
//! Two axum routers share one state: the public surface (resolution reads
//! and legacy-path routing) and the administrative surface (handle
//! lifecycle, admin-visibility reads, rule reload). Administrative paths
//! reaching the public surface are refused with 403 before any engine is
//! consulted.

pub mod server;

#[cfg(test)]
mod server_tests;

pub use server::{
    admin_router, public_router, serve_admin, serve_public, ApiError, CreateRequest, GatewayState,
    MutateRequest, SharedState,
};
