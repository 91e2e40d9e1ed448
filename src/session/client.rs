//! Client sessions.
//!
//! A client session relays one peer socket into its host's control
//! connection. Every inbound peer message becomes one or more message frames
//! tagged with the client's id; the host writes replies straight into the
//! client's outbound queue through a [`ClientHandle`].

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::Frame;
use crate::transport::{InboundEvent, PumpExit, Pumps};

// ============================================================================
// ClientHandle
// ============================================================================

/// Host-side view of a live client.
///
/// Held in the host's client table. Dropping the last handle releases the
/// host's reference to the client's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// The client socket's outbound queue.
    outbound: mpsc::Sender<Bytes>,
    /// Cancels the client session.
    shutdown: CancellationToken,
}

impl ClientHandle {
    pub(crate) fn new(outbound: mpsc::Sender<Bytes>, shutdown: CancellationToken) -> Self {
        Self { outbound, shutdown }
    }

    /// Queues a payload for the peer, waiting for room.
    ///
    /// Returns `false` if the client's socket has already stopped writing.
    pub async fn send(&self, payload: Bytes) -> bool {
        self.outbound.send(payload).await.is_ok()
    }

    /// Asks the client session to close. Idempotent.
    #[inline]
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// ClosedNotifier
// ============================================================================

/// Reports a client's termination to its host when dropped.
///
/// The channel is unbounded so a finishing client never waits on a host that
/// is itself tearing down.
#[derive(Debug)]
struct ClosedNotifier {
    id: u8,
    tx: mpsc::UnboundedSender<u8>,
}

impl Drop for ClosedNotifier {
    fn drop(&mut self) {
        // Host already gone.
        let _ = self.tx.send(self.id);
    }
}

// ============================================================================
// ClientSession
// ============================================================================

/// Relay loop for one peer socket.
pub(crate) struct ClientSession {
    id: u8,
    pumps: Pumps,
    host: mpsc::Sender<Bytes>,
    shutdown: CancellationToken,
    notifier: ClosedNotifier,
}

impl ClientSession {
    /// Builds a session over already-running pumps.
    ///
    /// # Arguments
    ///
    /// * `id` - Id assigned by the host
    /// * `pumps` - The peer socket's pumps
    /// * `host` - The host's outbound queue
    /// * `shutdown` - Token shared with the [`ClientHandle`]
    /// * `closed` - The host's client-closed channel
    pub(crate) fn new(
        id: u8,
        pumps: Pumps,
        host: mpsc::Sender<Bytes>,
        shutdown: CancellationToken,
        closed: mpsc::UnboundedSender<u8>,
    ) -> Self {
        Self {
            id,
            pumps,
            host,
            shutdown,
            notifier: ClosedNotifier { id, tx: closed },
        }
    }

    /// Runs until the peer leaves, the host asks the client to close, or the
    /// host's queue goes away. Notifies the host exactly once on return.
    pub(crate) async fn run(mut self) {
        debug!("Client session started");

        let exit = self.relay_loop().await;

        match &exit {
            Some(exit) => debug!(?exit, "Client socket ended"),
            None => debug!("Client session closing"),
        }

        let Self {
            pumps, notifier, ..
        } = self;
        pumps.finish(exit.as_ref());
        drop(notifier);
    }

    async fn relay_loop(&mut self) -> Option<PumpExit> {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return None,

                event = self.pumps.recv() => match event {
                    Some(InboundEvent::Message(data)) => {
                        if !self.relay(&data).await {
                            return None;
                        }
                    }
                    Some(InboundEvent::Closed(exit)) => return Some(exit),
                    None => return None,
                },
            }
        }
    }

    /// Pushes one peer message to the host as message frames.
    ///
    /// Returns `false` if the session should stop.
    async fn relay(&self, data: &[u8]) -> bool {
        trace!(len = data.len(), "Relaying to host");

        for frame in Frame::message_chunks(self.id, data) {
            tokio::select! {
                () = self.shutdown.cancelled() => return false,
                sent = self.host.send(frame) => {
                    if sent.is_err() {
                        debug!("Host queue closed");
                        return false;
                    }
                }
            }
        }

        true
    }
}

// ============================================================================
// Tests
// ============================================================================
