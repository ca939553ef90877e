//! Vireo — a PostgreSQL wire-protocol server framework
//!
//! Speaks the PostgreSQL v3 frontend/backend protocol over TCP (optionally
//! upgraded to TLS), parses SQL with `sqlparser`, and dispatches statements
//! to a pluggable [`QueryExecutor`]. Unmodified PostgreSQL drivers (libpq,
//! pgx, JDBC, pgbench, …) connect as if to a real server; storage is
//! supplied by the embedding application.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vireo_common::ServerConfig;
//! use vireo_pgwire::{PgWireServer, QueryExecutor};
//!
//! async fn run(backend: Arc<dyn QueryExecutor>) -> anyhow::Result<()> {
//!     let server = PgWireServer::new(ServerConfig::default(), backend);
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod catalog;
pub mod codec;
pub mod connection;
pub mod executor;
pub mod handler;
pub mod protocol;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::Connection;
pub use executor::{ColumnDef, QueryExecutor, ResultSet, TableSchema};
pub use handler::auth::{
    Authenticator, CertificateAuthenticator, CleartextPasswordAuthenticator, TrustAuthenticator,
};
pub use server::PgWireServer;
