//! Wire-protocol constants
//!
//! Message tags, startup magic codes, and transaction status bytes.

/// Protocol version 3.0, encoded as `(major << 16) | minor`
pub const PROTOCOL_VERSION: i32 = 196608;

/// Startup magic: SSLRequest
pub const SSL_REQUEST_CODE: i32 = 80877103;
/// Startup magic: CancelRequest
pub const CANCEL_REQUEST_CODE: i32 = 80877102;
/// Startup magic: GSSENCRequest
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Transaction status: idle (not in a transaction block)
pub const TRANSACTION_STATUS_IDLE: u8 = b'I';
/// Transaction status: inside a transaction block
pub const TRANSACTION_STATUS_IN_BLOCK: u8 = b'T';
/// Transaction status: inside a failed transaction block
pub const TRANSACTION_STATUS_FAILED: u8 = b'E';

/// Format code: text
pub const FORMAT_TEXT: i16 = 0;
/// Format code: binary
pub const FORMAT_BINARY: i16 = 1;

// Frontend tags
pub const TAG_QUERY: u8 = b'Q';
pub const TAG_PARSE: u8 = b'P';
pub const TAG_BIND: u8 = b'B';
pub const TAG_DESCRIBE: u8 = b'D';
pub const TAG_EXECUTE: u8 = b'E';
pub const TAG_CLOSE: u8 = b'C';
pub const TAG_SYNC: u8 = b'S';
pub const TAG_FLUSH: u8 = b'H';
pub const TAG_TERMINATE: u8 = b'X';
pub const TAG_PASSWORD: u8 = b'p';
pub const TAG_COPY_FAIL: u8 = b'f';

// Both directions
pub const TAG_COPY_DATA: u8 = b'd';
pub const TAG_COPY_DONE: u8 = b'c';

// Backend tags
pub const TAG_AUTHENTICATION: u8 = b'R';
pub const TAG_BACKEND_KEY_DATA: u8 = b'K';
pub const TAG_PARAMETER_STATUS: u8 = b'S';
pub const TAG_READY_FOR_QUERY: u8 = b'Z';
pub const TAG_ROW_DESCRIPTION: u8 = b'T';
pub const TAG_DATA_ROW: u8 = b'D';
pub const TAG_COMMAND_COMPLETE: u8 = b'C';
pub const TAG_COPY_IN_RESPONSE: u8 = b'G';
pub const TAG_EMPTY_QUERY_RESPONSE: u8 = b'I';
pub const TAG_ERROR_RESPONSE: u8 = b'E';
pub const TAG_NOTICE_RESPONSE: u8 = b'N';
pub const TAG_PARSE_COMPLETE: u8 = b'1';
pub const TAG_BIND_COMPLETE: u8 = b'2';
pub const TAG_CLOSE_COMPLETE: u8 = b'3';
pub const TAG_NO_DATA: u8 = b'n';
pub const TAG_PARAMETER_DESCRIPTION: u8 = b't';
pub const TAG_PORTAL_SUSPENDED: u8 = b's';
