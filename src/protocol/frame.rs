//! Control connection frames.
//!
//! Every message on a host's control connection after the key announcement
//! is one frame:
//!
//! ```text
//! ┌──────┬─────────┬───────────────────────────────┐
//! │  id  │ command │ payload (message only, ≤ 255) │
//! │  1B  │   1B    │ 0..=255 B                     │
//! └──────┴─────────┴───────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Length of the id + command header.
pub const HEADER_LEN: usize = 2;

/// Largest payload a single message frame may carry.
pub const MAX_PAYLOAD_LEN: usize = 255;

// ============================================================================
// Command
// ============================================================================

/// Frame command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Application bytes for a client.
    Message = 0x0,
    /// A client joined.
    Open = 0x1,
    /// A client left, or should leave.
    Close = 0x2,
}

impl Command {
    /// Returns the wire byte.
    #[inline]
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a wire byte.
    #[inline]
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Self::Message),
            0x1 => Some(Self::Open),
            0x2 => Some(Self::Close),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Message => "message",
            Self::Open => "open",
            Self::Close => "close",
        })
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A decoded control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Host-assigned client id.
    pub id: u8,
    /// What happened.
    pub command: Command,
    /// Message payload; empty for open and close.
    pub payload: Bytes,
}

impl Frame {
    /// Encodes an open frame: `[id, OPEN]`.
    #[inline]
    #[must_use]
    pub fn open(id: u8) -> Bytes {
        Bytes::copy_from_slice(&[id, Command::Open.as_byte()])
    }

    /// Encodes a close frame: `[id, CLOSE]`.
    #[inline]
    #[must_use]
    pub fn close(id: u8) -> Bytes {
        Bytes::copy_from_slice(&[id, Command::Close.as_byte()])
    }

    /// Encodes a message frame: `[id, MESSAGE] ++ payload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if `payload` exceeds
    /// [`MAX_PAYLOAD_LEN`]; use [`Frame::message_chunks`] for longer data.
    pub fn message(id: u8, payload: &[u8]) -> Result<Bytes> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::payload_too_large(payload.len(), MAX_PAYLOAD_LEN));
        }
        Ok(encode_message(id, payload))
    }

    /// Splits an application message into as many message frames as needed.
    ///
    /// Every frame carries the same id. An empty message still yields one
    /// empty message frame.
    pub fn message_chunks(id: u8, data: &[u8]) -> impl Iterator<Item = Bytes> + '_ {
        let empty = data.is_empty().then(|| encode_message(id, &[]));
        empty
            .into_iter()
            .chain(data.chunks(MAX_PAYLOAD_LEN).map(move |chunk| encode_message(id, chunk)))
    }

    /// Decodes a frame without copying the payload.
    ///
    /// Trailing bytes after an open or close header are ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedFrame`] if fewer than 2 bytes are present
    /// - [`Error::UnknownCommand`] if the command byte is unrecognized
    /// - [`Error::PayloadTooLarge`] if a message payload exceeds 255 bytes
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::malformed_frame(bytes.len()));
        }

        let id = bytes[0];
        let command =
            Command::from_byte(bytes[1]).ok_or_else(|| Error::unknown_command(id, bytes[1]))?;

        let payload = match command {
            Command::Message => {
                let payload = bytes.split_off(HEADER_LEN);
                if payload.len() > MAX_PAYLOAD_LEN {
                    return Err(Error::payload_too_large(payload.len(), MAX_PAYLOAD_LEN));
                }
                payload
            }
            Command::Open | Command::Close => Bytes::new(),
        };

        Ok(Self {
            id,
            command,
            payload,
        })
    }
}

fn encode_message(id: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(id);
    buf.put_u8(Command::Message.as_byte());
    buf.put_slice(payload);
    buf.freeze()
}

// ============================================================================
// Tests
// ============================================================================
