//! Startup negotiation and connection establishment
//!
//! Handles the untagged first frames (SSLRequest, GSSENCRequest,
//! CancelRequest, StartupMessage), the optional TLS upgrade, the
//! authentication exchange, and the parameter/key-data preamble that ends
//! with the first `ReadyForQuery('I')`.

use crate::connection::{BoxedSocket, Connection};
use crate::handler::auth::Authenticator;
use crate::protocol::backend::BackendMessage;
use crate::protocol::constants::*;
use crate::protocol::frontend::StartupMessage;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use vireo_common::{Result, ServerConfig, TlsConfig, VireoError};

/// Largest plausible startup frame; anything bigger is a framing error.
const MAX_STARTUP_LENGTH: usize = 10_000;

/// Outcome of the pre-startup negotiation
pub enum Negotiation {
    /// A normal session: possibly TLS-upgraded socket plus the decoded
    /// startup message
    Startup(Negotiated),
    /// A CancelRequest frame; the caller logs and drops the socket
    Cancel { process_id: i32, secret_key: i32 },
}

impl std::fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Negotiation::Startup(_) => f.debug_tuple("Startup").finish(),
            Negotiation::Cancel {
                process_id,
                secret_key,
            } => f
                .debug_struct("Cancel")
                .field("process_id", process_id)
                .field("secret_key", secret_key)
                .finish(),
        }
    }
}

/// Socket state after SSL negotiation and startup decoding
pub struct Negotiated {
    pub socket: BoxedSocket,
    pub startup: StartupMessage,
    pub tls: bool,
    pub client_cert: Option<Vec<u8>>,
}

/// Read untagged startup frames until a StartupMessage arrives, upgrading
/// to TLS on SSLRequest when configured (`'S'`) and declining otherwise
/// (`'N'`). The answer byte is raw, not wrapped in any envelope.
pub async fn negotiate(mut socket: BoxedSocket, tls: Option<&TlsConfig>) -> Result<Negotiation> {
    let mut tls_active = false;
    let mut client_cert: Option<Vec<u8>> = None;

    loop {
        let mut len_buf = [0u8; 4];
        socket.read_exact(&mut len_buf).await?;
        let len = i32::from_be_bytes(len_buf) as usize;

        if !(8..=MAX_STARTUP_LENGTH).contains(&len) {
            return Err(VireoError::InvalidMessage(format!(
                "invalid startup message length: {}",
                len
            )));
        }

        let mut body = vec![0u8; len - 4];
        socket.read_exact(&mut body).await?;

        let code = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        match code {
            SSL_REQUEST_CODE => {
                if let (Some(tls_config), false) = (tls, tls_active) {
                    debug!("SSL negotiation requested, accepting");
                    socket.write_all(b"S").await?;
                    socket.flush().await?;

                    let stream = tls_config
                        .acceptor()
                        .accept(socket)
                        .await
                        .map_err(|e| VireoError::Tls(format!("TLS handshake failed: {}", e)))?;
                    client_cert = stream
                        .get_ref()
                        .1
                        .peer_certificates()
                        .and_then(|certs| certs.first())
                        .map(|cert| cert.as_ref().to_vec());
                    socket = Box::new(stream);
                    tls_active = true;
                    info!("TLS connection established");
                } else {
                    debug!("SSL negotiation requested, declining");
                    socket.write_all(b"N").await?;
                    socket.flush().await?;
                }
            }
            GSSENC_REQUEST_CODE => {
                debug!("GSSAPI encryption requested, declining");
                socket.write_all(b"N").await?;
                socket.flush().await?;
            }
            CANCEL_REQUEST_CODE => {
                let (process_id, secret_key) = if body.len() >= 12 {
                    (
                        i32::from_be_bytes([body[4], body[5], body[6], body[7]]),
                        i32::from_be_bytes([body[8], body[9], body[10], body[11]]),
                    )
                } else {
                    (0, 0)
                };
                return Ok(Negotiation::Cancel {
                    process_id,
                    secret_key,
                });
            }
            _ => {
                let startup = StartupMessage::decode(&body)?;
                if startup.version_major != 3 {
                    return Err(VireoError::InvalidMessage(format!(
                        "unsupported protocol version {}.{}",
                        startup.version_major, startup.version_minor
                    )));
                }
                return Ok(Negotiation::Startup(Negotiated {
                    socket,
                    startup,
                    tls: tls_active,
                    client_cert,
                }));
            }
        }
    }
}

/// Complete the startup sequence on an authenticated-or-not connection:
/// run the authenticator, announce server parameters, hand out the cancel
/// key, and signal readiness.
pub async fn establish(
    conn: &mut Connection,
    config: &ServerConfig,
    authenticator: &dyn Authenticator,
) -> Result<()> {
    info!(
        user = %conn.user,
        database = %conn.database,
        tls = conn.tls,
        "client connected"
    );

    authenticator.authenticate(conn).await?;

    for (name, value) in [
        ("client_encoding", "UTF8"),
        ("server_encoding", "UTF8"),
        ("server_version", config.product_version.as_str()),
        ("DateStyle", "ISO, MDY"),
        ("integer_datetimes", "on"),
        ("standard_conforming_strings", "on"),
    ] {
        conn.send(BackendMessage::ParameterStatus {
            name: name.to_string(),
            value: value.to_string(),
        })
        .await?;
    }

    // 31-bit secret held for this connection's lifetime; a future
    // CancelRequest would authenticate against it
    conn.secret_key = rand::thread_rng().gen_range(0..=i32::MAX);
    conn.send(BackendMessage::BackendKeyData {
        process_id: std::process::id() as i32,
        secret_key: conn.secret_key,
    })
    .await?;

    conn.send(BackendMessage::ReadyForQuery {
        status: TRANSACTION_STATUS_IDLE,
    })
    .await?;
    conn.flush().await?;
    Ok(())
}

/// Best-effort error report during startup; the socket closes right after.
pub async fn report_startup_failure(conn: &mut Connection, err: &VireoError) {
    if let Err(e) = conn.send(BackendMessage::from_error(err)).await {
        warn!("failed to report startup error: {}", e);
        return;
    }
    let _ = conn.flush().await;
}
