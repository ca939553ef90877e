//! Vireo common library
//!
//! Shared types for the Vireo PostgreSQL wire-protocol framework: the error
//! taxonomy, server configuration, and TLS certificate handling.

pub mod config;
pub mod error;
pub mod tls;

// Re-export commonly used types
pub use config::{ClientAuthType, ServerConfig, TlsSettings};
pub use error::{Result, VireoError};
pub use tls::TlsConfig;
