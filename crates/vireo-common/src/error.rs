//! Error types for Vireo services

/// Result type alias using VireoError
pub type Result<T> = std::result::Result<T, VireoError>;

/// Main error type for the wire-protocol framework
#[derive(Debug, thiserror::Error)]
pub enum VireoError {
    /// Underlying socket read/write failure; unrecoverable for the connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tag byte unrecognized for the current direction, or a discriminator
    /// byte out of its legal set
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Declared length exceeds the bytes available or vice versa
    #[error("short message: expected {expected} bytes, got {actual}")]
    ShortMessage { expected: usize, actual: usize },

    /// Negative length where not permitted (e.g. bind value length < -1)
    #[error("invalid length: {0}")]
    InvalidLength(i32),

    /// Recognized but unimplemented feature
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Named prepared statement absent on this connection
    #[error("prepared statement \"{0}\" does not exist")]
    PreparedStatementNotExist(String),

    /// Named portal absent on this connection
    #[error("portal \"{0}\" does not exist")]
    PortalNotExist(String),

    /// Re-Parse of an existing named prepared statement
    #[error("prepared statement \"{0}\" already exists")]
    PreparedStatementExist(String),

    /// A query yielded more than one statement where only one is allowed
    #[error("cannot insert multiple commands into a prepared statement")]
    MultipleStatements,

    /// Named database, table, or column absent
    #[error("{0} does not exist")]
    NotExist(String),

    /// CREATE without IF NOT EXISTS of an existing object
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Arity mismatch between a COPY row and the target schema
    #[error("row field count {actual} does not match column count {expected}")]
    ColumnsNotEqual { expected: usize, actual: usize },

    /// Re-entrant BEGIN
    #[error("there is already a transaction in progress")]
    TransactionBlocked,

    /// Statement issued inside a failed transaction block
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    TransactionAborted,

    /// Upstream parser rejected the text
    #[error("syntax error: {0}")]
    Parser(String),

    /// Authentication exchange failed
    #[error("password authentication failed for user \"{0}\"")]
    AuthenticationFailed(String),

    /// TLS/certificate error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl VireoError {
    /// SQLSTATE code for the ErrorResponse `C` field. `XX000` is the
    /// catch-all internal error per convention.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            VireoError::Io(_) => "08006",
            VireoError::InvalidMessage(_) => "08P01",
            VireoError::ShortMessage { .. } => "08P01",
            VireoError::InvalidLength(_) => "08P01",
            VireoError::NotSupported(_) => "0A000",
            VireoError::PreparedStatementNotExist(_) => "26000",
            VireoError::PortalNotExist(_) => "34000",
            VireoError::PreparedStatementExist(_) => "42P05",
            VireoError::MultipleStatements => "42601",
            VireoError::NotExist(_) => "42P01",
            VireoError::AlreadyExists(_) => "42P04",
            VireoError::ColumnsNotEqual { .. } => "22P04",
            VireoError::TransactionBlocked => "25001",
            VireoError::TransactionAborted => "25P02",
            VireoError::Parser(_) => "42601",
            VireoError::AuthenticationFailed(_) => "28P01",
            VireoError::Tls(_) => "XX000",
            VireoError::Config(_) => "XX000",
        }
    }

    /// Whether the connection must be torn down after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, VireoError::Io(_) | VireoError::Tls(_))
    }
}
