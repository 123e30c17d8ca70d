//! Connection Manager Implementation

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::dispatch::{serve_connection, ConnContext};
use super::hook::{Accept, ConnectionHook, NoopHook};
use crate::config::{Config, ConnConfig};
use crate::udp::{SessionTable, UdpRelay};
use crate::Result;

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

// Linux / BSD errno values for descriptor exhaustion.
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Owns the TCP listener and the UDP relay and runs the accept loop.
pub struct ConnectionManager {
    config: Arc<Config>,
    hook: Arc<dyn ConnectionHook>,
    listener: Option<TcpListener>,
    udp_relay: Option<Arc<UdpRelay>>,
    active_connections: Arc<AtomicUsize>,
    next_connection_id: AtomicUsize,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            hook: Arc::new(NoopHook),
            listener: None,
            udp_relay: None,
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicUsize::new(1),
            shutdown_tx,
        }
    }

    /// Replace the default no-op connection hook.
    pub fn with_hook(mut self, hook: Arc<dyn ConnectionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Bind the TCP listener and the UDP relay socket. Returns their bound addresses.
    pub async fn bind(&mut self) -> Result<(SocketAddr, SocketAddr)> {
        let tcp_addr = self.config.server.tcp_listen_addr();
        let udp_addr = self.config.server.udp_listen_addr();

        info!("Binding TCP listener to {}", tcp_addr);
        let listener = TcpListener::bind(tcp_addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener on {}", tcp_addr))?;

        info!("Binding UDP relay to {}", udp_addr);
        let relay = UdpRelay::bind(udp_addr, self.config.server.udp_timeout)
            .await
            .with_context(|| format!("Failed to bind UDP relay on {}", udp_addr))?;

        let bound = (listener.local_addr()?, relay.local_addr()?);
        info!("Listening on tcp://{} and udp://{}", bound.0, bound.1);

        self.listener = Some(listener);
        self.udp_relay = Some(Arc::new(relay));
        Ok(bound)
    }

    pub fn get_bind_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn get_udp_addr(&self) -> Option<SocketAddr> {
        self.udp_relay.as_ref().and_then(|r| r.local_addr().ok())
    }

    /// The UDP session table, once bound.
    pub fn udp_sessions(&self) -> Option<Arc<SessionTable>> {
        self.udp_relay.as_ref().map(|r| r.sessions())
    }

    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Stop accepting and close in-flight connections.
    pub fn initiate_shutdown(&self) {
        info!("Initiating connection manager shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Start the UDP relay and accept until shutdown or a non-transient
    /// accept error. `bind` must have been called.
    pub async fn run(&self) -> Result<()> {
        let relay = self
            .udp_relay
            .clone()
            .ok_or_else(|| anyhow::anyhow!("UDP relay not initialized"))?;
        let udp_port = relay.local_addr()?.port();

        let mut relay_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                result = relay.run() => {
                    if let Err(e) = result {
                        error!("UDP relay stopped: {}", e);
                    }
                }
                _ = relay_shutdown.recv() => {
                    debug!("UDP relay received shutdown signal");
                }
            }
        });

        let conn_config = Arc::new(self.config.conn_config(udp_port));
        self.accept_connections(conn_config).await
    }

    async fn accept_connections(&self, conn_config: Arc<ConnConfig>) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut backoff = Duration::ZERO;

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            backoff = Duration::ZERO;
                            self.spawn_connection(stream, addr, Arc::clone(&conn_config));
                        }
                        Err(e) if is_transient_accept_error(&e) => {
                            backoff = if backoff.is_zero() {
                                ACCEPT_BACKOFF_START
                            } else {
                                (backoff * 2).min(ACCEPT_BACKOFF_MAX)
                            };
                            warn!("Accept error: {}; retrying in {:?}", e, backoff);
                            tokio::time::sleep(backoff).await;
                        }
                        Err(e) => {
                            error!("Accept failed: {}", e);
                            return Err(e).context("TCP listener failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, conn_config: Arc<ConnConfig>) {
        let stream = match self.hook.on_accept(stream, addr) {
            Accept::Continue(stream) => stream,
            Accept::Handled => {
                debug!("Connection from {} taken over by hook", addr);
                return;
            }
        };

        let local_addr = match stream.local_addr() {
            Ok(local) => local,
            Err(e) => {
                warn!("Dropping connection from {}: {}", addr, e);
                return;
            }
        };

        let connection_id = format!(
            "conn_{}",
            self.next_connection_id.fetch_add(1, Ordering::Relaxed)
        );
        let ctx = ConnContext {
            id: connection_id,
            peer_addr: addr,
            local_addr,
            config: conn_config,
            hook: Arc::clone(&self.hook),
        };

        let active_connections = Arc::clone(&self.active_connections);
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            active_connections.fetch_add(1, Ordering::Relaxed);
            Self::handle_connection(stream, ctx, shutdown_rx).await;
            active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    #[instrument(
        skip(stream, ctx, shutdown_rx),
        fields(connection_id = %ctx.id, addr = %ctx.peer_addr)
    )]
    async fn handle_connection(
        stream: TcpStream,
        ctx: ConnContext,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!("Accepted connection");
        let id = ctx.id.clone();

        tokio::select! {
            result = serve_connection(stream, ctx) => {
                match result {
                    Ok(()) => debug!("Connection {} finished", id),
                    Err(e) if e.is_benign() => debug!("Connection {} ended: {}", id, e),
                    Err(e) => warn!("Connection {} failed ({:?}): {}", id, e.kind(), e),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Connection {} closing for shutdown", id);
            }
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || matches!(e.raw_os_error(), Some(ENFILE) | Some(EMFILE))
}
