//! Backend (server → client) messages
//!
//! Every encoder frames through [`MessageBuilder`], so the length field
//! always covers the body plus its own four bytes and never the tag.

use crate::codec::MessageBuilder;
use crate::protocol::constants::*;
use vireo_common::VireoError;

/// One field of a RowDescription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attnum: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format_code: i16,
}

impl FieldDescription {
    /// A field with no table provenance, text format.
    pub fn new(name: impl Into<String>, type_oid: i32, type_size: i16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_attnum: 0,
            type_oid,
            type_size,
            type_modifier: -1,
            format_code: FORMAT_TEXT,
        }
    }
}

/// Backend message, dispatched to clients by tag
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// `'R'` auth type 0
    AuthenticationOk,
    /// `'R'` auth type 3
    AuthenticationCleartextPassword,
    /// `'R'` auth type 5
    AuthenticationMd5Password { salt: [u8; 4] },
    /// `'K'`
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// `'S'`
    ParameterStatus { name: String, value: String },
    /// `'1'`
    ParseComplete,
    /// `'2'`
    BindComplete,
    /// `'3'`
    CloseComplete,
    /// `'t'`
    ParameterDescription { oids: Vec<i32> },
    /// `'n'`
    NoData,
    /// `'T'`
    RowDescription { fields: Vec<FieldDescription> },
    /// `'D'` — `None` column encodes SQL NULL (wire length -1)
    DataRow { values: Vec<Option<Vec<u8>>> },
    /// `'C'` — e.g. `"INSERT 0 1"`, `"SELECT 2"`, `"COPY 2"`, `"BEGIN"`
    CommandComplete { tag: String },
    /// `'I'`
    EmptyQueryResponse,
    /// `'G'`
    CopyInResponse {
        format: i8,
        column_formats: Vec<i16>,
    },
    /// `'d'`
    CopyData { data: Vec<u8> },
    /// `'c'`
    CopyDone,
    /// `'Z'` — status `'I'`, `'T'`, or `'E'`
    ReadyForQuery { status: u8 },
    /// `'E'` — (field code, value) pairs
    ErrorResponse { fields: Vec<(u8, String)> },
    /// `'N'`
    NoticeResponse { fields: Vec<(u8, String)> },
    /// `'s'`
    PortalSuspended,
}

impl BackendMessage {
    /// Build an ErrorResponse with severity/code/message fields.
    pub fn error(sqlstate: &str, message: &str) -> Self {
        BackendMessage::ErrorResponse {
            fields: vec![
                (b'S', "ERROR".to_string()),
                (b'C', sqlstate.to_string()),
                (b'M', message.to_string()),
            ],
        }
    }

    /// Build an ErrorResponse from a framework error.
    pub fn from_error(err: &VireoError) -> Self {
        Self::error(err.sqlstate(), &err.to_string())
    }

    /// Build a NoticeResponse with a warning message.
    pub fn notice(message: &str) -> Self {
        BackendMessage::NoticeResponse {
            fields: vec![
                (b'S', "NOTICE".to_string()),
                (b'C', "00000".to_string()),
                (b'M', message.to_string()),
            ],
        }
    }

    /// The wire tag of this message.
    pub fn tag(&self) -> u8 {
        match self {
            BackendMessage::AuthenticationOk
            | BackendMessage::AuthenticationCleartextPassword
            | BackendMessage::AuthenticationMd5Password { .. } => TAG_AUTHENTICATION,
            BackendMessage::BackendKeyData { .. } => TAG_BACKEND_KEY_DATA,
            BackendMessage::ParameterStatus { .. } => TAG_PARAMETER_STATUS,
            BackendMessage::ParseComplete => TAG_PARSE_COMPLETE,
            BackendMessage::BindComplete => TAG_BIND_COMPLETE,
            BackendMessage::CloseComplete => TAG_CLOSE_COMPLETE,
            BackendMessage::ParameterDescription { .. } => TAG_PARAMETER_DESCRIPTION,
            BackendMessage::NoData => TAG_NO_DATA,
            BackendMessage::RowDescription { .. } => TAG_ROW_DESCRIPTION,
            BackendMessage::DataRow { .. } => TAG_DATA_ROW,
            BackendMessage::CommandComplete { .. } => TAG_COMMAND_COMPLETE,
            BackendMessage::EmptyQueryResponse => TAG_EMPTY_QUERY_RESPONSE,
            BackendMessage::CopyInResponse { .. } => TAG_COPY_IN_RESPONSE,
            BackendMessage::CopyData { .. } => TAG_COPY_DATA,
            BackendMessage::CopyDone => TAG_COPY_DONE,
            BackendMessage::ReadyForQuery { .. } => TAG_READY_FOR_QUERY,
            BackendMessage::ErrorResponse { .. } => TAG_ERROR_RESPONSE,
            BackendMessage::NoticeResponse { .. } => TAG_NOTICE_RESPONSE,
            BackendMessage::PortalSuspended => TAG_PORTAL_SUSPENDED,
        }
    }

    /// Encode with tag and length framing.
    pub fn encode(&self) -> Vec<u8> {
        let tag = self.tag();
        match self {
            BackendMessage::AuthenticationOk => MessageBuilder::tagged(tag).put_i32(0).finish(),
            BackendMessage::AuthenticationCleartextPassword => {
                MessageBuilder::tagged(tag).put_i32(3).finish()
            }
            BackendMessage::AuthenticationMd5Password { salt } => MessageBuilder::tagged(tag)
                .put_i32(5)
                .put_bytes(salt)
                .finish(),
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => MessageBuilder::tagged(tag)
                .put_i32(*process_id)
                .put_i32(*secret_key)
                .finish(),
            BackendMessage::ParameterStatus { name, value } => MessageBuilder::tagged(tag)
                .put_cstr(name)
                .put_cstr(value)
                .finish(),
            BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::NoData
            | BackendMessage::EmptyQueryResponse
            | BackendMessage::CopyDone
            | BackendMessage::PortalSuspended => MessageBuilder::tagged(tag).finish(),
            BackendMessage::ParameterDescription { oids } => {
                let mut builder = MessageBuilder::tagged(tag).put_i16(oids.len() as i16);
                for oid in oids {
                    builder = builder.put_i32(*oid);
                }
                builder.finish()
            }
            BackendMessage::RowDescription { fields } => {
                let mut builder = MessageBuilder::tagged(tag).put_i16(fields.len() as i16);
                for field in fields {
                    builder = builder
                        .put_cstr(&field.name)
                        .put_i32(field.table_oid)
                        .put_i16(field.column_attnum)
                        .put_i32(field.type_oid)
                        .put_i16(field.type_size)
                        .put_i32(field.type_modifier)
                        .put_i16(field.format_code);
                }
                builder.finish()
            }
            BackendMessage::DataRow { values } => {
                let mut builder = MessageBuilder::tagged(tag).put_i16(values.len() as i16);
                for value in values {
                    match value {
                        None => builder = builder.put_i32(-1),
                        Some(bytes) => {
                            builder = builder.put_i32(bytes.len() as i32).put_bytes(bytes)
                        }
                    }
                }
                builder.finish()
            }
            BackendMessage::CommandComplete { tag: command } => {
                MessageBuilder::tagged(tag).put_cstr(command).finish()
            }
            BackendMessage::CopyInResponse {
                format,
                column_formats,
            } => {
                let mut builder = MessageBuilder::tagged(tag)
                    .put_u8(*format as u8)
                    .put_i16(column_formats.len() as i16);
                for fmt in column_formats {
                    builder = builder.put_i16(*fmt);
                }
                builder.finish()
            }
            BackendMessage::CopyData { data } => {
                MessageBuilder::tagged(tag).put_bytes(data).finish()
            }
            BackendMessage::ReadyForQuery { status } => {
                MessageBuilder::tagged(tag).put_u8(*status).finish()
            }
            BackendMessage::ErrorResponse { fields }
            | BackendMessage::NoticeResponse { fields } => {
                let mut builder = MessageBuilder::tagged(tag);
                for (code, value) in fields {
                    builder = builder.put_u8(*code).put_cstr(value);
                }
                builder.put_u8(0).finish()
            }
        }
    }
}

/// Encode a value in text format: integers and floats as ASCII decimal,
/// bool as `t`/`f`, timestamps as `YYYY-MM-DD HH:MM:SS`.
pub fn text_encode_bool(v: bool) -> Vec<u8> {
    if v {
        b"t".to_vec()
    } else {
        b"f".to_vec()
    }
}

/// Timestamp text format used on the wire.
pub fn text_encode_timestamp(ts: chrono::NaiveDateTime) -> Vec<u8> {
    ts.format("%Y-%m-%d %H:%M:%S").to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_envelope(msg: &BackendMessage) {
        let encoded = msg.encode();
        assert_eq!(encoded[0], msg.tag());
        let len = i32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]) as usize;
        // length covers the body plus itself, never the tag
        assert_eq!(len, encoded.len() - 1);
    }

    #[test]
    fn test_envelope_invariant_across_messages() {
        let messages = vec![
            BackendMessage::AuthenticationOk,
            BackendMessage::AuthenticationCleartextPassword,
            BackendMessage::AuthenticationMd5Password { salt: [1, 2, 3, 4] },
            BackendMessage::BackendKeyData {
                process_id: 42,
                secret_key: 7,
            },
            BackendMessage::ParameterStatus {
                name: "client_encoding".into(),
                value: "UTF8".into(),
            },
            BackendMessage::ParseComplete,
            BackendMessage::BindComplete,
            BackendMessage::CloseComplete,
            BackendMessage::ParameterDescription { oids: vec![23, 25] },
            BackendMessage::NoData,
            BackendMessage::RowDescription {
                fields: vec![FieldDescription::new("?column?", 23, 4)],
            },
            BackendMessage::DataRow {
                values: vec![Some(b"1".to_vec()), None],
            },
            BackendMessage::CommandComplete {
                tag: "SELECT 1".into(),
            },
            BackendMessage::EmptyQueryResponse,
            BackendMessage::CopyInResponse {
                format: 0,
                column_formats: vec![0, 0, 0],
            },
            BackendMessage::CopyData {
                data: b"1\t2\n".to_vec(),
            },
            BackendMessage::CopyDone,
            BackendMessage::ReadyForQuery { status: b'I' },
            BackendMessage::error("XX000", "boom"),
            BackendMessage::notice("heads up"),
            BackendMessage::PortalSuspended,
        ];
        for msg in &messages {
            assert_envelope(msg);
        }
    }

    #[test]
    fn test_ready_for_query_exact_bytes() {
        let encoded = BackendMessage::ReadyForQuery { status: b'I' }.encode();
        assert_eq!(encoded, vec![b'Z', 0, 0, 0, 5, b'I']);
    }

    #[test]
    fn test_authentication_ok_exact_bytes() {
        let encoded = BackendMessage::AuthenticationOk.encode();
        assert_eq!(encoded, vec![b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn test_data_row_null_encoding() {
        let encoded = BackendMessage::DataRow {
            values: vec![None, Some(b"1".to_vec())],
        }
        .encode();
        // column count 2, then -1 length, then length 1 + "1"
        assert_eq!(&encoded[5..7], &[0, 2]);
        assert_eq!(&encoded[7..11], &(-1i32).to_be_bytes());
        assert_eq!(&encoded[11..15], &1i32.to_be_bytes());
        assert_eq!(encoded[15], b'1');
    }

    #[test]
    fn test_error_response_terminated() {
        let encoded = BackendMessage::error("42601", "syntax error").encode();
        assert_eq!(encoded[0], b'E');
        assert_eq!(*encoded.last().unwrap(), 0);
        // severity field first
        assert_eq!(encoded[5], b'S');
    }

    #[test]
    fn test_row_description_field_layout() {
        let encoded = BackendMessage::RowDescription {
            fields: vec![FieldDescription::new("a", 23, 4)],
        }
        .encode();
        let mut pos = 5;
        assert_eq!(&encoded[pos..pos + 2], &1i16.to_be_bytes());
        pos += 2;
        assert_eq!(&encoded[pos..pos + 2], b"a\0");
        pos += 2;
        assert_eq!(&encoded[pos..pos + 4], &0i32.to_be_bytes()); // table oid
        pos += 4;
        assert_eq!(&encoded[pos..pos + 2], &0i16.to_be_bytes()); // attnum
        pos += 2;
        assert_eq!(&encoded[pos..pos + 4], &23i32.to_be_bytes()); // type oid
        pos += 4;
        assert_eq!(&encoded[pos..pos + 2], &4i16.to_be_bytes()); // type size
        pos += 2;
        assert_eq!(&encoded[pos..pos + 4], &(-1i32).to_be_bytes()); // typmod
        pos += 4;
        assert_eq!(&encoded[pos..pos + 2], &0i16.to_be_bytes()); // format
    }

    #[test]
    fn test_text_encoders() {
        assert_eq!(text_encode_bool(true), b"t");
        assert_eq!(text_encode_bool(false), b"f");
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 34, 56)
            .unwrap();
        assert_eq!(text_encode_timestamp(ts), b"2024-03-09 12:34:56");
    }
}
