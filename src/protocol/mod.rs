//! Control connection wire protocol.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Shape |
//! |---------|-----------|-------|
//! | Key announcement | Tunnel → Host | raw key bytes, first message only |
//! | `open` | Tunnel → Host | `[id, 0x1]` |
//! | `message` | both | `[id, 0x0, payload..]` |
//! | `close` | both | `[id, 0x2]` |
//!
//! Peer sockets carry raw, unframed application bytes.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame encoding and decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Frame encoding and decoding.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Command, Frame, HEADER_LEN, MAX_PAYLOAD_LEN};
