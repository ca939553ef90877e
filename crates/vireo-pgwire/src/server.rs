//! Server socket manager
//!
//! Binds the listener, accepts connections, configures TCP keepalive, and
//! spawns one task per connection running startup then the request loop.
//! Live connections are tracked in a concurrent map that is only mutated
//! on accept and close; shutdown stops accepting and aborts the remaining
//! tasks, which closes their sockets and unwinds their loops.

use crate::connection::{BoxedSocket, Connection};
use crate::executor::QueryExecutor;
use crate::handler::auth::{Authenticator, TrustAuthenticator};
use crate::handler::query_loop::run_request_loop;
use crate::handler::startup::{self, Negotiation};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vireo_common::{Result, ServerConfig, TlsConfig, VireoError};

/// PostgreSQL wire-protocol server
pub struct PgWireServer {
    config: ServerConfig,
    backend: Arc<dyn QueryExecutor>,
    authenticator: Arc<dyn Authenticator>,
    tls: Option<TlsConfig>,
    connections: Arc<DashMap<u64, JoinHandle<()>>>,
    next_conn_id: AtomicU64,
    shutdown: Notify,
    shutting_down: AtomicBool,
}

impl PgWireServer {
    /// A server that trusts every client. Inject another policy with
    /// [`with_authenticator`](Self::with_authenticator).
    pub fn new(config: ServerConfig, backend: Arc<dyn QueryExecutor>) -> Self {
        Self {
            config,
            backend,
            authenticator: Arc::new(TrustAuthenticator),
            tls: None,
            connections: Arc::new(DashMap::new()),
            next_conn_id: AtomicU64::new(1),
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_tls(mut self, tls: Option<TlsConfig>) -> Self {
        self.tls = tls;
        self
    }

    /// Load TLS material from the configuration's `tls` section.
    pub fn with_tls_from_config(mut self) -> Result<Self> {
        self.tls = TlsConfig::from_settings(&self.config.tls)?;
        Ok(self)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(
            addr = %addr,
            tls = self.tls.is_some(),
            product = %self.config.product_name,
            "wire protocol server listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => accepted,
            };
            let (socket, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    if self.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                    return Err(e.into());
                }
            };
            info!(peer = %peer_addr, "new connection");

            configure_tcp_keepalive(&socket, self.config.tcp_keepalive_secs);

            let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
            let backend = self.backend.clone();
            let authenticator = self.authenticator.clone();
            let tls = self.tls.clone();
            let config = self.config.clone();
            let connections = self.connections.clone();

            let handle = tokio::spawn(async move {
                let result = serve_connection(
                    Box::new(socket),
                    conn_id,
                    &config,
                    &backend,
                    authenticator.as_ref(),
                    tls.as_ref(),
                )
                .await;
                if let Err(e) = result {
                    let text = e.to_string();
                    if text.contains("early eof") || text.contains("connection reset") {
                        debug!(conn_id, "client disconnected: {}", text);
                    } else {
                        error!(conn_id, "connection error: {}", text);
                    }
                }
                connections.remove(&conn_id);
            });
            self.connections.insert(conn_id, handle);
        }

        // Close each remaining connection's socket; its loop observes the
        // read error and unwinds.
        let ids: Vec<u64> = self.connections.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.connections.remove(&id) {
                handle.abort();
            }
        }
        info!("server stopped");
        Ok(())
    }

    /// Stop accepting and tear down live connections.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        self.shutdown.notify_one();
    }
}

/// Configure TCP keepalive on an accepted socket for faster dead-connection
/// detection.
fn configure_tcp_keepalive(stream: &TcpStream, keepalive_secs: u64) {
    use socket2::SockRef;
    use std::time::Duration;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {}", e);
    }

    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_keepalive(true) {
        warn!("failed to enable TCP keepalive: {}", e);
        return;
    }

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(keepalive_secs))
        .with_interval(Duration::from_secs(keepalive_secs / 2 + 1));

    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("failed to configure TCP keepalive timing: {}", e);
    }
}

/// Drive one connection from SSL negotiation to the end of its request
/// loop. Public so embeddings with their own listener (or tests) can hand
/// sockets in directly.
pub async fn serve_connection(
    socket: BoxedSocket,
    conn_id: u64,
    config: &ServerConfig,
    backend: &Arc<dyn QueryExecutor>,
    authenticator: &dyn Authenticator,
    tls: Option<&TlsConfig>,
) -> Result<()> {
    let negotiated = match startup::negotiate(socket, tls).await? {
        Negotiation::Cancel { process_id, .. } => {
            // CancelRequest handling is an extension point; the frame is
            // recognized and dropped
            warn!(backend_pid = process_id, "CancelRequest received, ignoring");
            return Ok(());
        }
        Negotiation::Startup(negotiated) => negotiated,
    };

    let mut conn = Connection::new(negotiated.socket, conn_id, negotiated.startup);
    conn.tls = negotiated.tls;
    conn.client_cert = negotiated.client_cert;

    if let Err(err) = startup::establish(&mut conn, config, authenticator).await {
        startup::report_startup_failure(&mut conn, &err).await;
        return Err(err);
    }

    run_request_loop(&mut conn, backend).await
}

/// Convenience wrapper used when embedding: reject obviously bad
/// configurations before binding.
pub fn validate_config(config: &ServerConfig) -> Result<()> {
    if config.port == 0 {
        return Err(VireoError::Config("port must be non-zero".into()));
    }
    Ok(())
}
