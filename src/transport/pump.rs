//! Read/write pumps for one WebSocket.
//!
//! Each socket is split into two halves owned by two tasks:
//!
//! - the **inbound pump** is the only reader. It enforces the message size
//!   limit, extends the read deadline on every pong and forwards application
//!   messages to a bounded queue.
//! - the **outbound pump** is the only writer. It drains the outbound queue
//!   with a write deadline per message and sends a keepalive ping every
//!   ping period, busy or not, so the peer's pongs keep extending the read
//!   deadline.
//!
//! Sessions talk to the socket only through [`Pumps`].
//!
//! # Shutdown
//!
//! | Trigger | Effect |
//! |---------|--------|
//! | Every outbound sender dropped | close frame (1000) written, outbound pump stops, inbound pump drains for at most the write wait |
//! | [`Pumps::kill`] | both pumps stop immediately, no further writes |
//! | Read error, remote close, deadline | inbound pump reports [`InboundEvent::Closed`] and stops |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, trace};

use crate::config::TunnelConfig;
use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Write half of a split WebSocket.
type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

/// Read half of a split WebSocket.
type WsSource<S> = SplitStream<WebSocketStream<S>>;

// ============================================================================
// InboundEvent
// ============================================================================

/// Event delivered by the inbound pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Application bytes from a text or binary message.
    Message(Bytes),
    /// The pump stopped; no further events follow.
    Closed(PumpExit),
}

// ============================================================================
// PumpExit
// ============================================================================

/// Why the inbound pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The peer sent a close frame or ended the stream.
    RemoteClosed,
    /// No pong arrived within the pong wait.
    Timeout,
    /// The peer sent a message above the size limit.
    Oversized {
        /// Size of the rejected message.
        len: usize,
    },
    /// Read failed.
    Transport(String),
    /// The owner killed the pumps or stopped listening.
    Killed,
}

impl PumpExit {
    /// Returns `true` if a close handshake may still be attempted.
    #[inline]
    #[must_use]
    pub fn is_viable(&self) -> bool {
        matches!(self, Self::RemoteClosed | Self::Oversized { .. })
    }
}

// ============================================================================
// Pumps
// ============================================================================

/// Handle to the inbound and outbound pump of one socket.
///
/// Dropping the handle (and every clone of [`Pumps::outbound`]) closes the
/// outbound queue, which makes the outbound pump send a normal closure.
#[derive(Debug)]
pub struct Pumps {
    /// Outbound message queue.
    outbound: mpsc::Sender<Bytes>,
    /// Inbound event queue.
    inbound: mpsc::Receiver<InboundEvent>,
    /// Stops both pumps without writing.
    kill: CancellationToken,
}

impl Pumps {
    /// Splits `ws` and spawns its two pumps on the current runtime.
    ///
    /// The pumps inherit the caller's tracing span.
    pub fn spawn<S>(ws: WebSocketStream<S>, config: &TunnelConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity);
        let kill = CancellationToken::new();
        let draining = CancellationToken::new();

        tokio::spawn(
            run_inbound(
                source,
                inbound_tx,
                kill.clone(),
                draining.clone(),
                config.clone(),
            )
            .in_current_span(),
        );

        tokio::spawn(
            run_outbound(sink, outbound_rx, kill.clone(), draining, config.clone())
                .in_current_span(),
        );

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            kill,
        }
    }

    /// Returns the outbound queue. Clones keep the socket open.
    #[inline]
    #[must_use]
    pub fn outbound(&self) -> &mpsc::Sender<Bytes> {
        &self.outbound
    }

    /// Receives the next inbound event.
    ///
    /// Returns `None` once the inbound pump has stopped and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.inbound.recv().await
    }

    /// Stops both pumps immediately. Idempotent.
    #[inline]
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Ends the socket according to how the inbound side stopped.
    ///
    /// A viable socket (or one whose inbound pump is still running) gets a
    /// normal closure once every outbound sender is gone; a dead one is
    /// killed.
    pub fn finish(self, exit: Option<&PumpExit>) {
        match exit {
            Some(exit) if !exit.is_viable() => {
                debug!(?exit, "Killing pumps");
                self.kill();
            }
            _ => debug!("Closing pumps"),
        }
    }
}

// ============================================================================
// Inbound Pump
// ============================================================================

/// Reads until the socket fails, closes, or goes quiet.
async fn run_inbound<S>(
    mut source: WsSource<S>,
    events: mpsc::Sender<InboundEvent>,
    kill: CancellationToken,
    draining: CancellationToken,
    config: TunnelConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait;
    let mut is_draining = false;

    let exit = loop {
        let message = tokio::select! {
            _ = kill.cancelled() => break PumpExit::Killed,
            _ = sleep_until(deadline) => break PumpExit::Timeout,
            _ = draining.cancelled(), if !is_draining => {
                // We sent a close frame; wait briefly for the peer's reply.
                is_draining = true;
                deadline = deadline.min(Instant::now() + config.write_wait);
                continue;
            }
            message = source.next() => message,
        };

        let data = match message {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_bytes()),
            Some(Ok(Message::Pong(_))) => {
                deadline = Instant::now() + config.pong_wait;
                trace!("Pong received, read deadline extended");
                continue;
            }
            // Pings are answered by the protocol layer.
            Some(Ok(Message::Ping(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "Close frame received");
                break PumpExit::RemoteClosed;
            }
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                break PumpExit::RemoteClosed;
            }
            Some(Err(WsError::Capacity(CapacityError::MessageTooLong { size, .. }))) => {
                break PumpExit::Oversized { len: size };
            }
            Some(Err(e)) => break PumpExit::Transport(e.to_string()),
        };

        if data.len() > config.max_message_size {
            break PumpExit::Oversized { len: data.len() };
        }

        trace!(len = data.len(), "Inbound message");

        tokio::select! {
            _ = kill.cancelled() => break PumpExit::Killed,
            sent = events.send(InboundEvent::Message(data)) => {
                if sent.is_err() {
                    break PumpExit::Killed;
                }
            }
        }
    };

    debug!(?exit, "Inbound pump stopped");

    if exit != PumpExit::Killed {
        tokio::select! {
            _ = kill.cancelled() => {}
            _ = events.send(InboundEvent::Closed(exit)) => {}
        }
    }
}

// ============================================================================
// Outbound Pump
// ============================================================================

/// Writes queued messages and keepalive pings until the queue closes.
async fn run_outbound<S>(
    mut sink: WsSink<S>,
    mut queue: mpsc::Receiver<Bytes>,
    kill: CancellationToken,
    draining: CancellationToken,
    config: TunnelConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = kill.cancelled() => {
                debug!("Outbound pump killed");
                return;
            }

            message = queue.recv() => match message {
                Some(data) => {
                    trace!(len = data.len(), "Outbound message");
                    if let Err(e) = write(&mut sink, Message::Binary(data), config.write_wait).await {
                        debug!(error = %e, "Write failed, outbound pump stopping");
                        return;
                    }
                }
                None => {
                    let close = Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: Utf8Bytes::from_static(""),
                    }));
                    if let Err(e) = write(&mut sink, close, config.write_wait).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    draining.cancel();
                    debug!("Outbound queue closed, pump stopped");
                    return;
                }
            },

            _ = ticker.tick() => {
                if let Err(e) = write(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    debug!(error = %e, "Ping failed, outbound pump stopping");
                    return;
                }
                trace!("Ping sent");
            }
        }
    }
}

/// Sends one message under the write deadline.
async fn write<S>(sink: &mut WsSink<S>, message: Message, write_wait: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(write_wait, sink.send(message))
        .await
        .map_err(|_| Error::connection(format!("write timed out after {write_wait:?}")))??;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    fn fast_config() -> TunnelConfig {
        TunnelConfig::new()
            .with_pong_wait(Duration::from_millis(400))
            .with_ping_period(Duration::from_millis(100))
            .with_write_wait(Duration::from_millis(500))
    }

    async fn pumped(config: &TunnelConfig) -> (Pumps, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (Pumps::spawn(server, config), client)
    }

    async fn next_event(pumps: &mut Pumps) -> Option<InboundEvent> {
        timeout(Duration::from_secs(5), pumps.recv())
            .await
            .expect("inbound event in time")
    }

    async fn next_data(client: &mut WebSocketStream<DuplexStream>) -> Message {
        loop {
            let message = timeout(Duration::from_secs(5), client.next())
                .await
                .expect("message in time")
                .expect("stream open")
                .expect("read ok");
            if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn test_inbound_forwards_messages() {
        let (mut pumps, mut client) = pumped(&TunnelConfig::new()).await;

        client.send(Message::binary(b"abc".to_vec())).await.expect("send");
        client.send(Message::text("hi".to_string())).await.expect("send");

        assert_eq!(
            next_event(&mut pumps).await,
            Some(InboundEvent::Message(Bytes::from_static(b"abc")))
        );
        assert_eq!(
            next_event(&mut pumps).await,
            Some(InboundEvent::Message(Bytes::from_static(b"hi")))
        );
    }

    #[tokio::test]
    async fn test_outbound_writes_binary() {
        let (pumps, mut client) = pumped(&TunnelConfig::new()).await;

        pumps
            .outbound()
            .send(Bytes::from_static(b"xyz"))
            .await
            .expect("queue open");

        assert_eq!(next_data(&mut client).await, Message::binary(b"xyz".to_vec()));
    }

    #[tokio::test]
    async fn test_keepalive_ping_sent() {
        let (_pumps, mut client) = pumped(&fast_config()).await;

        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("ping in time")
            .expect("stream open")
            .expect("read ok");
        assert!(matches!(message, Message::Ping(_)));
    }

    #[tokio::test]
    async fn test_pongs_keep_connection_alive() {
        let (mut pumps, mut client) = pumped(&fast_config()).await;

        // Reading lets the client answer pings; run well past the pong wait.
        let reader = tokio::spawn(async move {
            while let Some(Ok(_)) = client.next().await {}
        });

        let quiet = timeout(Duration::from_millis(1200), pumps.recv()).await;
        assert!(quiet.is_err(), "no event expected while pongs flow");
        reader.abort();
    }

    #[tokio::test]
    async fn test_busy_outbound_still_pings() {
        let (mut pumps, mut client) = pumped(&fast_config()).await;
        let outbound = pumps.outbound().clone();

        // Data every half ping period; the reader answers every ping it sees.
        let writer = tokio::spawn(async move {
            loop {
                if outbound.send(Bytes::from_static(b"tick")).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });
        let reader = tokio::spawn(async move {
            let mut pings = 0usize;
            while let Some(Ok(message)) = client.next().await {
                if message.is_ping() {
                    pings += 1;
                }
            }
            pings
        });

        let quiet = timeout(Duration::from_millis(1500), pumps.recv()).await;
        assert!(quiet.is_err(), "busy socket must stay open, got {quiet:?}");

        writer.abort();
        pumps.kill();
        let pings = timeout(Duration::from_secs(2), reader)
            .await
            .expect("reader stops")
            .expect("no panic");
        assert!(pings >= 5, "expected a ping every period, saw {pings}");
    }

    #[tokio::test]
    async fn test_read_deadline_expires_without_pongs() {
        let (mut pumps, _client) = pumped(&fast_config()).await;

        assert_eq!(
            next_event(&mut pumps).await,
            Some(InboundEvent::Closed(PumpExit::Timeout))
        );
    }

    #[tokio::test]
    async fn test_oversized_message_stops_pump() {
        let config = TunnelConfig::new().with_max_message_size(16);
        let (mut pumps, mut client) = pumped(&config).await;

        client.send(Message::binary(vec![0u8; 64])).await.expect("send");

        assert_eq!(
            next_event(&mut pumps).await,
            Some(InboundEvent::Closed(PumpExit::Oversized { len: 64 }))
        );
    }

    #[tokio::test]
    async fn test_remote_close_reported() {
        let (mut pumps, mut client) = pumped(&TunnelConfig::new()).await;

        client.close(None).await.expect("close");

        assert_eq!(
            next_event(&mut pumps).await,
            Some(InboundEvent::Closed(PumpExit::RemoteClosed))
        );
    }

    #[tokio::test]
    async fn test_dropping_queue_sends_normal_close() {
        let (pumps, mut client) = pumped(&TunnelConfig::new()).await;

        pumps.finish(None);

        match next_data(&mut client).await {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kill_stops_without_close_frame() {
        let (mut pumps, mut client) = pumped(&TunnelConfig::new()).await;
        let outbound = pumps.outbound().clone();

        pumps.kill();

        assert_eq!(next_event(&mut pumps).await, None);
        drop(outbound);
        drop(pumps);

        // Both halves are gone, so the client sees the stream end, not a close frame.
        let end = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("stream end in time");
        assert!(!matches!(end, Some(Ok(Message::Close(_)))));
    }

    #[test]
    fn test_exit_viability() {
        assert!(PumpExit::RemoteClosed.is_viable());
        assert!(PumpExit::Oversized { len: 1024 }.is_viable());
        assert!(!PumpExit::Timeout.is_viable());
        assert!(!PumpExit::Transport("reset".into()).is_viable());
        assert!(!PumpExit::Killed.is_viable());
    }
}
