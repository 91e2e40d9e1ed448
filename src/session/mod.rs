//! Host and client sessions.
//!
//! | Session | Owns | Registered in |
//! |---------|------|---------------|
//! | [`HostSession`] | control connection, client table | global [`Registry`](crate::registry::Registry) |
//! | client session | one peer socket | its host's client table |
//!
//! Sessions talk only through queues. A host writes payloads straight into a
//! client's outbound queue; a client pushes frames straight into its host's.

// ============================================================================
// Submodules
// ============================================================================

/// Client sessions.
pub mod client;

/// Host sessions.
pub mod host;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::ClientHandle;
pub use host::{HostHandle, HostSession};
