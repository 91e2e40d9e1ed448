//! Error types for the tunnel.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use spider_tunnel::{Frame, Result};
//!
//! fn handle(bytes: bytes::Bytes) -> Result<()> {
//!     let frame = Frame::decode(bytes)?;
//!     println!("frame for client {}", frame.id);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::MalformedFrame`], [`Error::UnknownCommand`], [`Error::PayloadTooLarge`], [`Error::UnknownClient`] |
//! | Registry | [`Error::InvalidKey`], [`Error::SessionNotFound`], [`Error::RegistryFull`] |
//! | External | [`Error::Io`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when [`TunnelConfig`](crate::TunnelConfig) validation fails.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection or upgrade failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The session on the other end of a queue is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Frame shorter than the two byte header.
    #[error("Malformed frame: {len} bytes, need at least 2")]
    MalformedFrame {
        /// Length of the received frame.
        len: usize,
    },

    /// Command byte outside the known command set.
    #[error("Unknown command {command:#04x} for client {id}")]
    UnknownCommand {
        /// Client id carried by the frame.
        id: u8,
        /// The unrecognized command byte.
        command: u8,
    },

    /// Message payload longer than a single frame may carry.
    #[error("Payload of {len} bytes exceeds frame limit of {max}")]
    PayloadTooLarge {
        /// Length of the offending payload.
        len: usize,
        /// Maximum payload length per frame.
        max: usize,
    },

    /// Frame addressed to a client id this host never issued.
    #[error("Frame addressed to unknown client {id}")]
    UnknownClient {
        /// The unrecognized client id.
        id: u8,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Session key could not be decoded or has the wrong length.
    #[error("Invalid session key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// No live session is registered under the key.
    #[error("Session not found: {key}")]
    SessionNotFound {
        /// Hex form of the key that was looked up.
        key: String,
    },

    /// Every key of a sequential registry is in use.
    #[error("Registry full: all {capacity} keys in use")]
    RegistryFull {
        /// Number of usable keys.
        capacity: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(len: usize) -> Self {
        Self::MalformedFrame { len }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(id: u8, command: u8) -> Self {
        Self::UnknownCommand { id, command }
    }

    /// Creates a payload too large error.
    #[inline]
    pub fn payload_too_large(len: usize, max: usize) -> Self {
        Self::PayloadTooLarge { len, max }
    }

    /// Creates an unknown client error.
    #[inline]
    pub fn unknown_client(id: u8) -> Self {
        Self::UnknownClient { id }
    }

    /// Creates an invalid key error.
    #[inline]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(key: impl Into<String>) -> Self {
        Self::SessionNotFound { key: key.into() }
    }

    /// Creates a registry full error.
    #[inline]
    pub fn registry_full(capacity: u64) -> Self {
        Self::RegistryFull { capacity }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_) | Self::Io(_)
        )
    }

    /// Returns `true` if the error must tear down the host session.
    ///
    /// Every other protocol error only drops the offending frame.
    #[inline]
    #[must_use]
    pub fn is_fatal_to_host(&self) -> bool {
        matches!(self, Self::UnknownClient { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
