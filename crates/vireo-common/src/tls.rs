//! TLS configuration for the PostgreSQL wire protocol
//!
//! Supports certificate files for production and self-signed certificates
//! for development. Client certificates can be requested or required
//! depending on [`ClientAuthType`].

use crate::config::{ClientAuthType, TlsSettings};
use crate::error::{Result, VireoError};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// TLS configuration for the server side of the SSLRequest upgrade
#[derive(Clone)]
pub struct TlsConfig {
    server_config: Arc<rustls::ServerConfig>,
}

impl TlsConfig {
    /// Build from [`TlsSettings`]; `Ok(None)` when TLS is disabled.
    pub fn from_settings(settings: &TlsSettings) -> Result<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }

        let (cert_path, key_path) = match (&settings.server_cert_path, &settings.server_key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(VireoError::Config(
                    "tls.enabled requires tls.server_cert_path and tls.server_key_path".into(),
                ))
            }
        };

        let config = Self::from_files(
            Path::new(cert_path),
            Path::new(key_path),
            &settings.root_cert_paths,
            settings.client_auth_type,
        )?;
        Ok(Some(config))
    }

    /// Create TLS config from certificate and key files
    pub fn from_files(
        cert_path: &Path,
        key_path: &Path,
        root_cert_paths: &[String],
        client_auth: ClientAuthType,
    ) -> Result<Self> {
        info!("Loading TLS certificates from files");

        let certs = Self::load_pem_certs(cert_path)?;
        let key = Self::load_pem_key(key_path)?;

        let mut roots = RootCertStore::empty();
        for path in root_cert_paths {
            for cert in Self::load_pem_certs(Path::new(path))? {
                roots
                    .add(cert)
                    .map_err(|e| VireoError::Tls(format!("invalid root certificate: {}", e)))?;
            }
        }

        Self::build(certs, key, roots, client_auth)
    }

    /// Create TLS config with a self-signed certificate (development only)
    pub fn self_signed(common_name: &str) -> Result<Self> {
        info!("Generating self-signed TLS certificate for: {}", common_name);

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, "Vireo");
        params.distinguished_name = dn;

        params.subject_alt_names = vec![
            SanType::DnsName(
                common_name
                    .try_into()
                    .map_err(|e| VireoError::Tls(format!("invalid DNS name: {}", e)))?,
            ),
            SanType::DnsName(
                "localhost"
                    .try_into()
                    .map_err(|e| VireoError::Tls(format!("invalid DNS name: {}", e)))?,
            ),
        ];

        let key_pair = KeyPair::generate()
            .map_err(|e| VireoError::Tls(format!("failed to generate key pair: {}", e)))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| VireoError::Tls(format!("failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(cert.der().to_vec());
        let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
            .map_err(|e| VireoError::Tls(format!("failed to serialize private key: {:?}", e)))?;

        Self::build(
            vec![cert_der],
            key_der,
            RootCertStore::empty(),
            ClientAuthType::NoClientCert,
        )
    }

    fn build(
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        roots: RootCertStore,
        client_auth: ClientAuthType,
    ) -> Result<Self> {
        let builder = match client_auth {
            ClientAuthType::NoClientCert => rustls::ServerConfig::builder().with_no_client_auth(),
            ClientAuthType::RequestClientCert => {
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| VireoError::Tls(format!("client verifier: {}", e)))?;
                rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
            }
            ClientAuthType::RequireAndVerifyClientCert => {
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| VireoError::Tls(format!("client verifier: {}", e)))?;
                rustls::ServerConfig::builder().with_client_cert_verifier(verifier)
            }
        };

        let server_config = builder
            .with_single_cert(certs, key)
            .map_err(|e| VireoError::Tls(format!("TLS configuration error: {}", e)))?;

        Ok(Self {
            server_config: Arc::new(server_config),
        })
    }

    /// Get the TLS acceptor for async connections
    pub fn acceptor(&self) -> tokio_rustls::TlsAcceptor {
        tokio_rustls::TlsAcceptor::from(self.server_config.clone())
    }

    fn load_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
        let file = std::fs::File::open(path)
            .map_err(|e| VireoError::Tls(format!("failed to open {}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VireoError::Tls(format!("failed to parse certificates: {}", e)))?;
        if certs.is_empty() {
            return Err(VireoError::Tls(format!(
                "no certificates found in {}",
                path.display()
            )));
        }
        Ok(certs)
    }

    fn load_pem_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
        let file = std::fs::File::open(path)
            .map_err(|e| VireoError::Tls(format!("failed to open {}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| VireoError::Tls(format!("failed to parse private key: {}", e)))?
            .ok_or_else(|| VireoError::Tls(format!("no private key found in {}", path.display())))
    }
}
