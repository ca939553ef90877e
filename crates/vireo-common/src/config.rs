//! Configuration for the Vireo server
//!
//! All values can be overridden via environment variables with the `VIREO__`
//! prefix (e.g. `VIREO__PORT=6432`, `VIREO__TLS__ENABLED=true`).

use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address; empty means all interfaces
    pub address: String,
    /// TCP port
    pub port: u16,
    /// Product name reported to clients
    pub product_name: String,
    /// Product version reported via the `server_version` parameter
    pub product_version: String,
    /// TCP keepalive time in seconds (detects dead connections)
    pub tcp_keepalive_secs: u64,
    /// TLS configuration
    pub tls: TlsSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: 5432,
            product_name: "vireo".to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            tcp_keepalive_secs: env_parse_or_default("VIREO_TCP_KEEPALIVE_SECS", 10),
            tls: TlsSettings::default(),
        }
    }
}

impl ServerConfig {
    /// The `address:port` string the listener binds to
    pub fn listen_addr(&self) -> String {
        let address = if self.address.is_empty() {
            "0.0.0.0"
        } else {
            self.address.as_str()
        };
        format!("{}:{}", address, self.port)
    }
}

/// TLS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Enable the SSLRequest upgrade path
    pub enabled: bool,
    /// Path to the server certificate file (PEM)
    pub server_cert_path: Option<String>,
    /// Path to the server private key file (PEM)
    pub server_key_path: Option<String>,
    /// Root CA certificates used to verify client certificates
    pub root_cert_paths: Vec<String>,
    /// Client certificate policy
    pub client_auth_type: ClientAuthType,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            server_cert_path: None,
            server_key_path: None,
            root_cert_paths: Vec::new(),
            client_auth_type: ClientAuthType::NoClientCert,
        }
    }
}

/// How the server treats client certificates during the TLS handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientAuthType {
    /// Never request a client certificate
    NoClientCert,
    /// Request a certificate but accept connections without one
    RequestClientCert,
    /// Require a certificate and verify it against the root store
    RequireAndVerifyClientCert,
}

/// Load configuration from environment variables
pub fn load_from_env() -> Result<ServerConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::Environment::with_prefix("VIREO").separator("__"))
        .build()?
        .try_deserialize()
}

/// Get environment variable with default
pub fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable as parsed type with default
pub fn env_parse_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
