//! Upgrade request routing.
//!
//! | Path | Route |
//! |------|-------|
//! | `{prefix}` | [`Route::Host`] |
//! | `{prefix}/{hex key}` | [`Route::Client`] |
//!
//! Anything else is not found.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::registry::SessionKey;

// ============================================================================
// Route
// ============================================================================

/// Role requested by an upgrade path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Open a new host control connection.
    Host,
    /// Join the host registered under the key.
    Client(SessionKey),
}

impl Route {
    /// Parses a request path.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidKey`] if the key segment is empty, not hex, or not
    ///   `key_length` bytes
    /// - [`Error::Connection`] if the path matches no route
    pub fn parse(path: &str, prefix: &str, key_length: usize) -> Result<Self> {
        let rest = path
            .strip_prefix(prefix)
            .ok_or_else(|| Error::connection(format!("no route for {path}")))?;

        if rest.is_empty() {
            return Ok(Self::Host);
        }

        let segment = rest
            .strip_prefix('/')
            .filter(|segment| !segment.contains('/'))
            .ok_or_else(|| Error::connection(format!("no route for {path}")))?;

        if segment.is_empty() {
            return Err(Error::invalid_key("missing key segment"));
        }

        SessionKey::from_hex(segment, key_length).map(Self::Client)
    }
}

// ============================================================================
// Tests
// ============================================================================
