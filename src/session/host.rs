//! Host sessions.
//!
//! A host session owns one control connection and every client admitted
//! under its key.
//!
//! # Lifecycle
//!
//! | Phase | What happens |
//! |-------|--------------|
//! | Starting | Registered under a random key; the key is the first outbound message |
//! | Running | Admits clients, relays frames, reports client closures |
//! | Closing | Closes every client, waits for them, then closes its own socket |
//! | Closed | Key unregistered exactly once |
//!
//! # Host Frames
//!
//! | Frame | Handling |
//! |-------|----------|
//! | `message` for a live id | payload queued to that client |
//! | `close` for a live id | client asked to close |
//! | any frame for an id that already left | dropped |
//! | any frame for an id never issued | host closes |
//! | `open`, malformed, unknown command | dropped |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::TunnelConfig;
use crate::error::{Error, Result};
use crate::protocol::{Command, Frame};
use crate::registry::{KeyTable, Registry, SessionKey};
use crate::session::client::{ClientHandle, ClientSession};
use crate::transport::{InboundEvent, PumpExit, Pumps, Socket};

// ============================================================================
// HostHandle
// ============================================================================

/// Registry entry for a live host.
///
/// Cheap to clone. Every clone refers to the same session.
#[derive(Debug, Clone)]
pub struct HostHandle {
    /// Admission queue into the host's event loop.
    admissions: mpsc::Sender<Socket>,
    /// Cancels the host session.
    shutdown: CancellationToken,
}

impl HostHandle {
    /// Hands a freshly upgraded peer socket to the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the host has stopped admitting
    /// clients. The socket is dropped.
    pub async fn admit(&self, socket: Socket) -> Result<()> {
        self.admissions
            .send(socket)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Asks the host session to close. Idempotent.
    #[inline]
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

}

// ============================================================================
// Registration
// ============================================================================

/// Unregisters the host key when dropped.
struct Registration {
    registry: Arc<Registry<HostHandle>>,
    key: SessionKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.key);
        debug!(key = %self.key, "Host key unregistered");
    }
}

// ============================================================================
// HostSession
// ============================================================================

/// Event loop for one host control connection.
pub struct HostSession {
    key: SessionKey,
    config: Arc<TunnelConfig>,
    pumps: Pumps,
    clients: KeyTable<ClientHandle>,
    /// Every id handed out, live or not.
    issued: FxHashSet<u8>,
    admissions: mpsc::Receiver<Socket>,
    closed_tx: mpsc::UnboundedSender<u8>,
    closed_rx: mpsc::UnboundedReceiver<u8>,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    registration: Registration,
}

// ============================================================================
// HostSession - Starting
// ============================================================================

impl HostSession {
    /// Registers a new host and spawns its session.
    ///
    /// # Arguments
    ///
    /// * `socket` - Upgraded control connection
    /// * `registry` - Global host registry
    /// * `config` - Tunnel configuration
    /// * `shutdown` - Cancelling this token closes the host
    ///
    /// Returns the handle stored in the registry, and the key it was stored
    /// under.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegistryFull`] if no free key could be drawn. The
    /// socket is dropped.
    pub fn start(
        socket: Socket,
        registry: &Arc<Registry<HostHandle>>,
        config: Arc<TunnelConfig>,
        shutdown: CancellationToken,
    ) -> Result<(SessionKey, HostHandle)> {
        let (admit_tx, admit_rx) = mpsc::channel(config.queue_capacity);
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        let handle = HostHandle {
            admissions: admit_tx,
            shutdown: shutdown.clone(),
        };

        let key = registry.register(handle.clone())?;
        let registration = Registration {
            registry: Arc::clone(registry),
            key: key.clone(),
        };

        let span = info_span!("host", key = %key);
        let session_key = key.clone();

        tokio::spawn(
            async move {
                let pumps = Pumps::spawn(socket, &config);
                let session = Self {
                    key: session_key,
                    clients: KeyTable::sequential(),
                    config,
                    pumps,
                    issued: FxHashSet::default(),
                    admissions: admit_rx,
                    closed_tx,
                    closed_rx,
                    shutdown,
                    tasks: JoinSet::new(),
                    registration,
                };
                session.run().await;
            }
            .instrument(span),
        );

        Ok((key, handle))
    }

    async fn run(mut self) {
        info!("Host session started");

        let key = Bytes::copy_from_slice(self.key.as_bytes());
        let exit = if self.pumps.outbound().send(key).await.is_ok() {
            self.event_loop().await
        } else {
            warn!("Control connection closed before key announcement");
            None
        };

        self.close(exit).await;
    }
}

// ============================================================================
// HostSession - Running
// ============================================================================

impl HostSession {
    /// Multiplexes the four event sources until the host should close.
    ///
    /// Returns how the control socket ended, or `None` if the session chose
    /// to close.
    async fn event_loop(&mut self) -> Option<PumpExit> {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Host shutdown requested");
                    return None;
                }

                Some(socket) = self.admissions.recv() => {
                    self.admit(socket).await;
                }

                Some(id) = self.closed_rx.recv() => {
                    self.client_closed(id).await;
                }

                Some(joined) = self.tasks.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Client task failed");
                    }
                }

                event = self.pumps.recv() => match event {
                    Some(InboundEvent::Message(data)) => {
                        if let Err(e) = self.handle_frame(data).await {
                            if e.is_fatal_to_host() {
                                error!(error = %e, "Closing host");
                                return None;
                            }
                            warn!(error = %e, "Dropping host frame");
                        }
                    }
                    Some(InboundEvent::Closed(exit)) => return Some(exit),
                    None => return None,
                },
            }
        }
    }

    /// Registers a peer socket as a client and announces it to the host.
    async fn admit(&mut self, socket: Socket) {
        let span = info_span!("client", id = tracing::field::Empty);
        let pumps = span.in_scope(|| Pumps::spawn(socket, &self.config));
        let shutdown = CancellationToken::new();
        let handle = ClientHandle::new(pumps.outbound().clone(), shutdown.clone());

        let key = match self.clients.insert(handle) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Refusing client");
                pumps.finish(None);
                return;
            }
        };

        // Sequential keys are exactly one byte.
        let id = key.as_bytes()[0];
        span.record("id", id);
        self.issued.insert(id);

        if self.pumps.outbound().send(Frame::open(id)).await.is_err() {
            debug!(id, "Control queue closed, open not announced");
        }

        let session = ClientSession::new(
            id,
            pumps,
            self.pumps.outbound().clone(),
            shutdown,
            self.closed_tx.clone(),
        );
        self.tasks.spawn(session.run().instrument(span));

        info!(id, clients = self.clients.len(), "Client admitted");
    }

    /// Announces a finished client and frees its id.
    async fn client_closed(&mut self, id: u8) {
        if self.clients.remove(&SessionKey::from(id)).is_none() {
            debug!(id, "Closure for unregistered client ignored");
            return;
        }

        if self.pumps.outbound().send(Frame::close(id)).await.is_err() {
            debug!(id, "Control queue closed, close not announced");
        }

        info!(id, clients = self.clients.len(), "Client closed");
    }

    /// Applies one frame from the host.
    ///
    /// # Errors
    ///
    /// Returns the decode error for malformed frames, and
    /// [`Error::UnknownClient`] for ids this host never issued.
    async fn handle_frame(&mut self, data: Bytes) -> Result<()> {
        let frame = Frame::decode(data)?;

        if frame.command == Command::Open {
            warn!(id = frame.id, "Host sent open, ignoring");
            return Ok(());
        }

        let Some(client) = self.clients.get(&SessionKey::from(frame.id)) else {
            if self.issued.contains(&frame.id) {
                debug!(id = frame.id, command = %frame.command, "Client already gone, dropping");
                return Ok(());
            }
            return Err(Error::unknown_client(frame.id));
        };

        match frame.command {
            Command::Message => {
                if !client.send(frame.payload).await {
                    debug!(id = frame.id, "Client queue closed, dropping");
                }
            }
            Command::Close => {
                debug!(id = frame.id, "Host closed client");
                client.close();
            }
            Command::Open => {}
        }

        Ok(())
    }
}

// ============================================================================
// HostSession - Closing
// ============================================================================

impl HostSession {
    /// Tears the session down.
    ///
    /// Clients are closed first so none of them outlives the host, then the
    /// control socket is closed and the key unregistered.
    async fn close(self, exit: Option<PumpExit>) {
        let Self {
            config,
            pumps,
            mut clients,
            admissions,
            mut tasks,
            registration,
            ..
        } = self;

        info!(clients = clients.len(), "Host session closing");

        drop(admissions);
        for (_, client) in clients.drain() {
            client.close();
        }

        let drained = timeout(config.write_wait, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Client task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = tasks.len(), "Clients did not close in time");
            tasks.abort_all();
        }

        pumps.finish(exit.as_ref());
        drop(registration);

        info!("Host session closed");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{WebSocketStream, accept_async, client_async};

    const WAIT: Duration = Duration::from_secs(2);

    type Remote = WebSocketStream<TcpStream>;

    /// Connects a websocket pair over loopback TCP.
    async fn socket_pair() -> (Socket, Remote) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let (accepted, connected) = tokio::join!(
            async {
                let (stream, _) = listener.accept().await.expect("accept");
                accept_async(stream).await.expect("upgrade")
            },
            async {
                let stream = TcpStream::connect(addr).await.expect("connect");
                let (ws, _) = client_async(format!("ws://{addr}/"), stream)
                    .await
                    .expect("handshake");
                ws
            }
        );

        (accepted, connected)
    }

    async fn next_binary(remote: &mut Remote) -> Vec<u8> {
        loop {
            let message = timeout(WAIT, remote.next())
                .await
                .expect("message in time")
                .expect("stream open")
                .expect("message");
            match message {
                Message::Binary(data) => return data.to_vec(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    async fn wait_closed(remote: &mut Remote) {
        timeout(WAIT, async {
            while let Some(Ok(message)) = remote.next().await {
                if message.is_close() {
                    break;
                }
            }
        })
        .await
        .expect("closed in time");
    }

    struct Host {
        key: SessionKey,
        handle: HostHandle,
        remote: Remote,
        registry: Arc<Registry<HostHandle>>,
    }

    async fn start_host() -> Host {
        let registry = Arc::new(Registry::new(8));
        let (socket, remote) = socket_pair().await;
        let (key, handle) = HostSession::start(
            socket,
            &registry,
            Arc::new(TunnelConfig::default()),
            CancellationToken::new(),
        )
        .expect("registered");
        Host {
            key,
            handle,
            remote,
            registry,
        }
    }

    async fn admit_client(host: &mut Host) -> (u8, Remote) {
        let (socket, peer) = socket_pair().await;
        host.handle.admit(socket).await.expect("admitted");
        let open = next_binary(&mut host.remote).await;
        assert_eq!(open.len(), 2);
        assert_eq!(open[1], Command::Open.as_byte());
        (open[0], peer)
    }

    #[tokio::test]
    async fn test_key_announced_first() {
        let mut host = start_host().await;

        let announced = next_binary(&mut host.remote).await;
        assert_eq!(announced, host.key.as_bytes());
        assert!(host.registry.has(&host.key));
    }

    #[tokio::test]
    async fn test_ids_start_at_one() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;

        let (first, _a) = admit_client(&mut host).await;
        let (second, _b) = admit_client(&mut host).await;
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn test_relay_both_ways() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;
        let (id, mut peer) = admit_client(&mut host).await;

        peer.send(Message::binary(b"hi".to_vec())).await.expect("send");
        assert_eq!(next_binary(&mut host.remote).await, vec![id, 0, b'h', b'i']);

        host.remote
            .send(Message::binary(vec![id, 0, b'x', b'x']))
            .await
            .expect("send");
        assert_eq!(next_binary(&mut peer).await, b"xx".to_vec());
    }

    #[tokio::test]
    async fn test_host_close_frame_closes_peer() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;
        let (id, mut peer) = admit_client(&mut host).await;

        host.remote
            .send(Message::binary(Frame::close(id)))
            .await
            .expect("send");

        wait_closed(&mut peer).await;
        assert_eq!(next_binary(&mut host.remote).await, vec![id, 2]);
    }

    #[tokio::test]
    async fn test_departed_client_frames_dropped() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;
        let (id, mut peer) = admit_client(&mut host).await;

        peer.close(None).await.expect("close");
        assert_eq!(next_binary(&mut host.remote).await, vec![id, 2]);

        host.remote
            .send(Message::binary(vec![id, 0, b'l', b'a', b't', b'e']))
            .await
            .expect("send");

        // Host still serves new clients.
        let (next_id, _peer) = admit_client(&mut host).await;
        assert_eq!(next_id, id + 1);
        assert!(host.registry.has(&host.key));
    }

    #[tokio::test]
    async fn test_malformed_frames_dropped() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;
        let (id, mut peer) = admit_client(&mut host).await;

        for junk in [vec![id], vec![id, 9], vec![id, 1]] {
            host.remote.send(Message::binary(junk)).await.expect("send");
        }
        host.remote
            .send(Message::binary(vec![id, 0, b'o', b'k']))
            .await
            .expect("send");

        assert_eq!(next_binary(&mut peer).await, b"ok".to_vec());
    }

    #[tokio::test]
    async fn test_never_issued_id_closes_host() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;
        let (_, mut peer) = admit_client(&mut host).await;

        host.remote
            .send(Message::binary(vec![200, 0, b'?']))
            .await
            .expect("send");

        wait_closed(&mut peer).await;
        wait_closed(&mut host.remote).await;

        timeout(WAIT, async {
            while host.registry.has(&host.key) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("unregistered");
    }

    #[tokio::test]
    async fn test_shutdown_cascades_to_clients() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;
        let (_, mut a) = admit_client(&mut host).await;
        let (_, mut b) = admit_client(&mut host).await;

        host.handle.shutdown();

        wait_closed(&mut a).await;
        wait_closed(&mut b).await;
        wait_closed(&mut host.remote).await;

        // Admissions stop once the session is closing.
        let (late, _remote) = socket_pair().await;
        assert!(host.handle.admit(late).await.is_err());
    }

    #[tokio::test]
    async fn test_control_close_unregisters() {
        let mut host = start_host().await;
        next_binary(&mut host.remote).await;
        let (_, mut peer) = admit_client(&mut host).await;

        host.remote.close(None).await.expect("close");
        wait_closed(&mut peer).await;

        timeout(WAIT, async {
            while host.registry.has(&host.key) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("unregistered");

        let (socket, _late) = socket_pair().await;
        assert!(matches!(
            host.handle.admit(socket).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
