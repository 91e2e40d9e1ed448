//! WebSocket transport layer.
//!
//! Owns everything that touches a socket: the listener and its routing, and
//! the pumps that move messages between a socket and a session's queues.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  /net        ┌────────────┐  frames   ┌──────────┐
//! │   Host   │◄────────────►│ HostSession│◄─────────►│  Client  │
//! │ (remote) │              │  + Pumps   │  queues   │ Session  │
//! └──────────┘              └────────────┘           └────┬─────┘
//!                                                         │ Pumps
//!                                           /net/{key}    ▼
//!                                                   ┌──────────┐
//!                                                   │   Peer   │
//!                                                   └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `pump` | Per-socket read and write tasks with keepalive |
//! | `route` | Upgrade path parsing |
//! | `server` | Listener, upgrade and dispatch |

// ============================================================================
// Imports
// ============================================================================

use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;

// ============================================================================
// Submodules
// ============================================================================

/// Per-socket read and write tasks.
pub mod pump;

/// Upgrade path parsing.
pub mod route;

/// Listener, upgrade and dispatch.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use pump::{InboundEvent, PumpExit, Pumps};
pub use route::Route;
pub use server::Tunnel;

// ============================================================================
// Types
// ============================================================================

/// An upgraded server-side socket.
pub type Socket = WebSocketStream<TcpStream>;
