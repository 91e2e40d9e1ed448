//! Tunnel listener.
//!
//! Accepts TCP connections, upgrades them to WebSockets, and routes each one
//! by request path:
//!
//! 1. `{prefix}` upgrades and starts a new host session
//! 2. `{prefix}/{hex key}` is resolved against the host registry before the
//!    upgrade completes; unknown keys are refused with `404`
//! 3. The upgraded peer is handed to the host's admission queue
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │                 Tunnel                    │
//! │              (single port)                │
//! │  ┌─────────────────────────────────────┐  │
//! │  │ key a1b2.. → HostHandle → clients   │  │
//! │  │ key 9f0e.. → HostHandle → clients   │  │
//! │  └─────────────────────────────────────┘  │
//! └───────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::TunnelConfig;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::session::{HostHandle, HostSession};

use super::route::Route;

// ============================================================================
// Constants
// ============================================================================

/// Poll interval while waiting for hosts to unregister on shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

// ============================================================================
// Tunnel
// ============================================================================

/// A bound tunnel server.
///
/// Owns the global host registry. Every host session is a child of the
/// tunnel's shutdown token.
///
/// # Example
///
/// ```ignore
/// let tunnel = Tunnel::bind("0.0.0.0:8080", TunnelConfig::default()).await?;
/// println!("hosts connect to {}", tunnel.host_url());
///
/// tokio::signal::ctrl_c().await?;
/// tunnel.shutdown().await;
/// ```
pub struct Tunnel {
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Shared configuration.
    config: Arc<TunnelConfig>,
    /// Live hosts by key.
    hosts: Arc<Registry<HostHandle>>,
    /// Stops the accept loop and every host.
    shutdown: CancellationToken,
}

/// Outcome of the upgrade callback.
enum Resolved {
    Host,
    Client(HostHandle),
}

// ============================================================================
// Tunnel - Constructor
// ============================================================================

impl Tunnel {
    /// Binds the listener and starts the accept loop.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on (port 0 for random)
    /// * `config` - Tunnel configuration
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `config` is invalid
    /// - [`Error::Io`] if binding fails
    pub async fn bind(addr: impl ToSocketAddrs, config: TunnelConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Tunnel listener bound");

        let tunnel = Arc::new(Self {
            local_addr,
            hosts: Arc::new(Registry::new(config.host_key_length)),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        });

        let tunnel_clone = Arc::clone(&tunnel);
        tokio::spawn(async move {
            tunnel_clone.accept_loop(listener).await;
        });

        info!(%local_addr, prefix = %tunnel.config.route_prefix, "Tunnel started");

        Ok(tunnel)
    }
}

// ============================================================================
// Tunnel - Public API
// ============================================================================

impl Tunnel {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the URL hosts connect to.
    ///
    /// Format: `ws://127.0.0.1:{port}{prefix}`
    #[must_use]
    pub fn host_url(&self) -> String {
        format!("ws://127.0.0.1:{}{}", self.port(), self.config.route_prefix)
    }

    /// Returns the URL peers use to join the host registered under `key`.
    #[must_use]
    pub fn client_url(&self, key: &[u8]) -> String {
        format!("{}/{}", self.host_url(), hex::encode(key))
    }

    /// Returns the number of registered hosts.
    #[inline]
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Returns the configuration in use.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Stops accepting and closes every host.
    ///
    /// Waits up to the write wait for hosts to finish closing.
    pub async fn shutdown(&self) {
        info!(hosts = self.host_count(), "Tunnel shutting down");

        self.shutdown.cancel();

        let drained = timeout(self.config.write_wait, async {
            while !self.hosts.is_empty() {
                sleep(SHUTDOWN_POLL).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(hosts = self.host_count(), "Hosts still closing after shutdown");
        }

        info!("Tunnel shutdown complete");
    }
}

// ============================================================================
// Tunnel - Accept Loop
// ============================================================================

impl Tunnel {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!("Accept loop shutting down");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let tunnel = Arc::clone(&self);
                        let span = info_span!("conn", %addr);
                        tokio::spawn(
                            async move {
                                match tunnel.handle_connection(stream).await {
                                    Ok(()) => {}
                                    Err(e) if e.is_connection_error() => {
                                        debug!(error = %e, "Connection not served");
                                    }
                                    Err(e) => warn!(error = %e, "Connection handling failed"),
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                },
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one connection and hands it to its session.
    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut resolved = None;

        let callback = |request: &Request, response: Response| {
            let path = request.uri().path();
            match self.resolve(path) {
                Ok(outcome) => {
                    resolved = Some(outcome);
                    Ok(response)
                }
                Err(e) => {
                    info!(path, error = %e, "Upgrade refused");
                    Err(reject(&e))
                }
            }
        };

        let upgrade = accept_hdr_async_with_config(
            stream,
            callback,
            Some(self.config.websocket_config()),
        );
        let socket = timeout(self.config.write_wait, upgrade)
            .await
            .map_err(|_| Error::connection("WebSocket upgrade timed out"))?
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        match resolved {
            Some(Resolved::Host) => {
                let (key, _) = HostSession::start(
                    socket,
                    &self.hosts,
                    Arc::clone(&self.config),
                    self.shutdown.child_token(),
                )?;
                info!(%key, hosts = self.host_count(), "Host connected");
                Ok(())
            }
            Some(Resolved::Client(host)) => {
                debug!("Peer upgraded, admitting");
                host.admit(socket).await
            }
            None => Err(Error::connection("upgrade completed without a route")),
        }
    }

    /// Maps a request path to a new host or a live host's handle.
    fn resolve(&self, path: &str) -> Result<Resolved> {
        match Route::parse(path, &self.config.route_prefix, self.hosts.key_length())? {
            Route::Host => Ok(Resolved::Host),
            Route::Client(key) => self
                .hosts
                .get(&key)
                .map(Resolved::Client)
                .ok_or_else(|| Error::session_not_found(key.to_hex())),
        }
    }
}

/// Builds the HTTP refusal for a failed route.
fn reject(error: &Error) -> ErrorResponse {
    let status = match error {
        Error::InvalidKey { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::NOT_FOUND,
    };

    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = status;
    response
}

// ============================================================================
// Tests
// ============================================================================
