//! L7 proxy mode: accept on the VIP, splice to a backend.
//!
//! One listener per configured VIP port. Every accepted connection is
//! hashed to a backend through the registry, gets a session entry, and
//! is pumped by its own task with readiness-driven nonblocking I/O.
//!
//! Half-close policy: a client FIN tears the whole connection down; a
//! backend FIN is tolerated (HTTP/1.0-style servers close after the
//! response) and is propagated to the client as a write shutdown while
//! the client-to-backend direction keeps running.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use flowgate_dataplane::{BackendRegistry, LbStats, RealServer, SessionTable};
use flowgate_wire::{ipproto, FiveTuple, MacAddr};

/// Per-direction copy buffer.
const COPY_BUF: usize = 8 * 1024;

/// Log every 1st, then every 64th backendless accept.
const NO_BACKEND_LOG_EVERY: u64 = 64;

/// Why the proxy failed to come up.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A listener socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The listen address.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },
}

/// The L7 proxy: listeners plus the shared control structures.
pub struct ProxyServer {
    vip: u32,
    listeners: Vec<TcpListener>,
    registry: Arc<BackendRegistry>,
    sessions: Arc<SessionTable>,
    stats: Arc<LbStats>,
    no_backend_logged: AtomicU64,
}

impl ProxyServer {
    /// Bind one listener per port on the VIP.
    pub async fn bind(
        vip: u32,
        ports: &[u16],
        registry: Arc<BackendRegistry>,
        sessions: Arc<SessionTable>,
        stats: Arc<LbStats>,
    ) -> Result<Self, ProxyError> {
        let mut listeners = Vec::with_capacity(ports.len());
        for &port in ports {
            let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(vip), port));
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ProxyError::Bind { addr, source })?;
            info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(), "listening");
            listeners.push(listener);
        }
        Ok(Self {
            vip,
            listeners,
            registry,
            sessions,
            stats,
            no_backend_logged: AtomicU64::new(0),
        })
    }

    /// Addresses actually bound (ports resolve after binding port 0).
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    /// Accept until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut loops = Vec::with_capacity(self.listeners.len());
        for idx in 0..self.listeners.len() {
            let server = Arc::clone(&self);
            let shutdown = shutdown.clone();
            loops.push(tokio::spawn(server.accept_loop(idx, shutdown)));
        }
        for handle in loops {
            let _ = handle.await;
        }
        info!("proxy stopped");
    }

    async fn accept_loop(self: Arc<Self>, idx: usize, mut shutdown: watch::Receiver<bool>) {
        let listener = &self.listeners[idx];
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender means the process is going away.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => Arc::clone(&self).dispatch(stream, peer, port),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                },
            }
        }
    }

    /// Route one accepted connection, or close it when no backend is
    /// available.
    fn dispatch(self: Arc<Self>, stream: TcpStream, peer: SocketAddr, port: u16) {
        let peer_ip = match peer {
            SocketAddr::V4(v4) => u32::from(*v4.ip()),
            SocketAddr::V6(_) => {
                // IPv6 peers are out of scope; hang up.
                self.stats.record_drop();
                return;
            }
        };
        let tuple = FiveTuple::new(peer_ip, self.vip, peer.port(), port, ipproto::TCP);

        let Some(backend) = self.registry.select(&tuple) else {
            self.stats.no_backend.fetch_add(1, Ordering::Relaxed);
            self.stats.record_drop();
            let n = self.no_backend_logged.fetch_add(1, Ordering::Relaxed);
            if n % NO_BACKEND_LOG_EVERY == 0 {
                warn!(flow = %tuple, suppressed = n, "no backend available, closing connection");
            }
            // Dropping the stream closes the accepted socket.
            return;
        };

        tokio::spawn(async move {
            self.handle_connection(stream, tuple, backend).await;
        });
    }

    async fn handle_connection(&self, client: TcpStream, tuple: FiveTuple, backend: RealServer) {
        let backend_addr =
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(backend.ip), backend.port));
        let backend_stream = match TcpStream::connect(backend_addr).await {
            Ok(s) => s,
            Err(e) => {
                warn!(backend = %backend_addr, error = %e, "backend connect failed");
                self.stats.record_drop();
                return;
            }
        };

        let server_tuple = FiveTuple::new(
            tuple.src_ip,
            backend.ip,
            tuple.src_port,
            backend.port,
            ipproto::TCP,
        );
        self.sessions
            .create(tuple, server_tuple, backend.id, MacAddr::ZERO);
        self.registry.record_conn(backend.id);
        debug!(flow = %tuple, backend = backend.id, "connection established");

        self.pump(client, backend_stream, tuple, backend.id).await;

        self.sessions.remove(&tuple);
        self.registry.record_disconnect(backend.id);
        debug!(flow = %tuple, "connection torn down");
    }

    /// Bidirectional byte pump until the client closes or a socket
    /// errors.
    ///
    /// Writes go through `write_all`, so a short write parks the task
    /// on writability instead of losing the remainder.
    async fn pump(&self, client: TcpStream, backend: TcpStream, tuple: FiveTuple, backend_id: u32) {
        let (mut client_rd, mut client_wr) = client.into_split();
        let (mut backend_rd, mut backend_wr) = backend.into_split();
        let mut to_backend = vec![0u8; COPY_BUF];
        let mut to_client = vec![0u8; COPY_BUF];
        let mut backend_open = true;

        loop {
            tokio::select! {
                read = client_rd.read(&mut to_backend) => match read {
                    Ok(0) => {
                        debug!(flow = %tuple, "client closed");
                        break;
                    }
                    Ok(n) => {
                        self.stats.record_rx();
                        if let Err(e) = backend_wr.write_all(&to_backend[..n]).await {
                            debug!(flow = %tuple, error = %e, "backend write failed");
                            break;
                        }
                        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                        self.sessions.update_stats(&tuple, n as u64);
                        self.registry.record_traffic(backend_id, n as u64, 0);
                    }
                    Err(e) => {
                        debug!(flow = %tuple, error = %e, "client read failed");
                        break;
                    }
                },
                read = backend_rd.read(&mut to_client), if backend_open => match read {
                    Ok(0) => {
                        // Backend half-closed; pass the FIN to the
                        // client and keep the other direction alive.
                        debug!(flow = %tuple, "backend half-closed");
                        backend_open = false;
                        let _ = client_wr.shutdown().await;
                    }
                    Ok(n) => {
                        self.stats.record_tx();
                        if let Err(e) = client_wr.write_all(&to_client[..n]).await {
                            debug!(flow = %tuple, error = %e, "client write failed");
                            break;
                        }
                        self.sessions.update_stats(&tuple, n as u64);
                        self.registry.record_traffic(backend_id, 0, n as u64);
                    }
                    Err(e) => {
                        debug!(flow = %tuple, error = %e, "backend read failed");
                        break;
                    }
                },
            }
        }
    }
}
