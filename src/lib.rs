//! Spider Tunnel - WebSocket relay multiplexing many peers over one host.
//!
//! A host opens a control connection and receives a random key. Peers that
//! connect with that key become the host's clients; their traffic travels to
//! the host as small tagged frames over the single control connection.
//!
//! # Architecture
//!
//! The tunnel is a set of sessions that only talk through queues:
//!
//! - **Host session**: owns the control connection and its client table
//! - **Client session**: owns one peer socket, tagged with a one-byte id
//! - **Pumps**: one read task and one write task per socket, with keepalive
//!
//! Key design principles:
//!
//! - A host never outlives its control connection, and no client outlives its host
//! - Every host and client unregisters exactly once
//! - Peer payloads are split into frames of at most 255 bytes, in order
//!
//! # Quick Start
//!
//! ```no_run
//! use spider_tunnel::{Result, Tunnel, TunnelConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let tunnel = Tunnel::bind("0.0.0.0:8080", TunnelConfig::default()).await?;
//!     println!("Hosts connect to {}", tunnel.host_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     tunnel.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Timings, limits and routes |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Control connection frames |
//! | [`registry`] | Key tables for hosts and clients |
//! | [`session`] | Host and client sessions |
//! | [`transport`] | Listener, routing and socket pumps |

// ============================================================================
// Modules
// ============================================================================

/// Tunnel configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Control connection wire protocol.
pub mod protocol;

/// Session registries.
pub mod registry;

/// Host and client sessions.
pub mod session;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::TunnelConfig;

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{Command, Frame};

// Registry types
pub use registry::{KeyTable, Registry, SessionKey};

// Session types
pub use session::{ClientHandle, HostHandle, HostSession};

// Transport types
pub use transport::{InboundEvent, PumpExit, Pumps, Route, Tunnel};
