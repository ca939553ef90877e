//! Authentication policies
//!
//! The startup handler hands the connection to an injected
//! [`Authenticator`] after the startup message is decoded. Policies send
//! their own `Authentication*` exchange; a returned error aborts the
//! connection after a best-effort ErrorResponse.

use crate::connection::Connection;
use crate::protocol::backend::BackendMessage;
use crate::protocol::constants::TAG_PASSWORD;
use crate::protocol::frontend::FrontendMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use vireo_common::{Result, VireoError};

/// Pluggable authentication policy
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, conn: &mut Connection) -> Result<()>;
}

/// Accept everyone. The default policy.
pub struct TrustAuthenticator;

#[async_trait]
impl Authenticator for TrustAuthenticator {
    async fn authenticate(&self, conn: &mut Connection) -> Result<()> {
        conn.send(BackendMessage::AuthenticationOk).await?;
        debug!(user = %conn.user, "trust authentication");
        Ok(())
    }
}

/// Cleartext password exchange against a configured credential store
pub struct CleartextPasswordAuthenticator {
    credentials: HashMap<String, String>,
}

impl CleartextPasswordAuthenticator {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Authenticator for CleartextPasswordAuthenticator {
    async fn authenticate(&self, conn: &mut Connection) -> Result<()> {
        conn.send(BackendMessage::AuthenticationCleartextPassword)
            .await?;
        conn.flush().await?;

        let (tag, body) = conn.read_message().await?;
        if tag != TAG_PASSWORD {
            return Err(VireoError::InvalidMessage(format!(
                "expected password message, got tag 0x{:02x}",
                tag
            )));
        }
        let password = match FrontendMessage::decode(tag, &body)? {
            FrontendMessage::Password { password } => password,
            _ => unreachable!("tag 'p' decodes to Password"),
        };

        match self.credentials.get(&conn.user) {
            Some(expected) if *expected == password => {
                conn.send(BackendMessage::AuthenticationOk).await?;
                info!(user = %conn.user, "password authentication successful");
                Ok(())
            }
            _ => {
                warn!(user = %conn.user, "password authentication failed");
                Err(VireoError::AuthenticationFailed(conn.user.clone()))
            }
        }
    }
}

/// Succeeds iff the TLS handshake produced a client certificate. Chain
/// verification itself happens in the TLS layer when the server is
/// configured with `RequireAndVerifyClientCert`.
pub struct CertificateAuthenticator;

#[async_trait]
impl Authenticator for CertificateAuthenticator {
    async fn authenticate(&self, conn: &mut Connection) -> Result<()> {
        if !conn.tls || conn.client_cert.is_none() {
            warn!(user = %conn.user, "certificate authentication failed: no client certificate");
            return Err(VireoError::AuthenticationFailed(conn.user.clone()));
        }
        conn.send(BackendMessage::AuthenticationOk).await?;
        info!(user = %conn.user, "certificate authentication successful");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frontend::StartupMessage;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn startup_for(user: &str) -> StartupMessage {
        let mut parameters = BTreeMap::new();
        parameters.insert("user".to_string(), user.to_string());
        StartupMessage {
            version_major: 3,
            version_minor: 0,
            parameters,
        }
    }

    #[tokio::test]
    async fn test_trust_sends_authentication_ok() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(Box::new(server), 1, startup_for("alice"));

        TrustAuthenticator.authenticate(&mut conn).await.unwrap();
        conn.flush().await.unwrap();

        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_cleartext_password_accepts_and_rejects() {
        let mut credentials = HashMap::new();
        credentials.insert("alice".to_string(), "secret".to_string());
        let auth = CleartextPasswordAuthenticator::new(credentials);

        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(Box::new(server), 1, startup_for("alice"));

        let client_task = tokio::spawn(async move {
            // AuthenticationCleartextPassword request
            let mut buf = [0u8; 9];
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [b'R', 0, 0, 0, 8, 0, 0, 0, 3]);
            client
                .write_all(
                    &FrontendMessage::Password {
                        password: "secret".to_string(),
                    }
                    .encode(),
                )
                .await
                .unwrap();
            // AuthenticationOk
            client.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
        });

        auth.authenticate(&mut conn).await.unwrap();
        conn.flush().await.unwrap();
        client_task.await.unwrap();

        // wrong password fails
        let mut credentials = HashMap::new();
        credentials.insert("alice".to_string(), "secret".to_string());
        let auth = CleartextPasswordAuthenticator::new(credentials);
        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(Box::new(server), 2, startup_for("alice"));
        let client_task = tokio::spawn(async move {
            let mut buf = [0u8; 9];
            client.read_exact(&mut buf).await.unwrap();
            client
                .write_all(
                    &FrontendMessage::Password {
                        password: "wrong".to_string(),
                    }
                    .encode(),
                )
                .await
                .unwrap();
        });
        let err = auth.authenticate(&mut conn).await.unwrap_err();
        assert!(matches!(err, VireoError::AuthenticationFailed(_)));
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_certificate_requires_tls_peer_cert() {
        let (_client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(Box::new(server), 1, startup_for("alice"));
        let err = CertificateAuthenticator
            .authenticate(&mut conn)
            .await
            .unwrap_err();
        assert!(matches!(err, VireoError::AuthenticationFailed(_)));

        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(Box::new(server), 2, startup_for("alice"));
        conn.tls = true;
        conn.client_cert = Some(vec![0x30, 0x82]);
        CertificateAuthenticator
            .authenticate(&mut conn)
            .await
            .unwrap();
        conn.flush().await.unwrap();
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], b'R');
    }
}
