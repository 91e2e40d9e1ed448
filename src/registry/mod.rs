//! Session registries.
//!
//! Maps opaque keys to live sessions. Used in two roles:
//!
//! | Role | Type | Keys | Access |
//! |------|------|------|--------|
//! | Global host registry | [`Registry`] | random, 8 bytes | shared, locked |
//! | Per-host client table | [`KeyTable`] | sequential, 1 byte | host event loop only |
//!
//! A session owns its connection; the registry only owns the association
//! and the session removes itself on teardown.

// ============================================================================
// Submodules
// ============================================================================

/// Session keys and key generation.
pub mod key;

/// Key tables and the shared registry.
pub mod table;

// ============================================================================
// Re-exports
// ============================================================================

pub use key::SessionKey;
pub use table::{KeyTable, Registry};
