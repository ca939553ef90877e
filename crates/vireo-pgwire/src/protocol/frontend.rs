//! Frontend (client → server) messages
//!
//! Typed envelopes with decoders that consume exactly the declared body.
//! Messages also encode themselves, which the test suite uses for
//! round-trip checks and which a driver embedding would use directly.

use crate::codec::{ByteCursor, MessageBuilder};
use crate::protocol::constants::*;
use std::collections::BTreeMap;
use vireo_common::{Result, VireoError};

/// What a Describe or Close targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// `'S'` — a prepared statement
    Statement,
    /// `'P'` — a portal
    Portal,
}

impl TargetKind {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            b'S' => Ok(TargetKind::Statement),
            b'P' => Ok(TargetKind::Portal),
            other => Err(VireoError::InvalidMessage(format!(
                "invalid describe/close kind: 0x{:02x}",
                other
            ))),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TargetKind::Statement => b'S',
            TargetKind::Portal => b'P',
        }
    }
}

/// One bound parameter value from a Bind message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindParameter {
    /// 0 = text, 1 = binary
    pub format: i16,
    /// `None` encodes SQL NULL (wire length -1)
    pub value: Option<Vec<u8>>,
}

impl BindParameter {
    /// Render the parameter as text. Binary values are decoded by width
    /// (4 → int4, 8 → int8, 2 → int2), everything else as UTF-8.
    pub fn text_value(&self) -> Option<String> {
        let bytes = self.value.as_ref()?;
        if self.format == FORMAT_BINARY {
            let rendered = match bytes.len() {
                2 => i16::from_be_bytes([bytes[0], bytes[1]]).to_string(),
                4 => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string(),
                8 => i64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ])
                .to_string(),
                _ => String::from_utf8_lossy(bytes).to_string(),
            };
            Some(rendered)
        } else {
            Some(String::from_utf8_lossy(bytes).to_string())
        }
    }
}

/// The startup message (untagged frame sent before everything else)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub version_major: i16,
    pub version_minor: i16,
    /// key/value parameters; recognized keys include `user`, `database`,
    /// `application_name`, `client_encoding`
    pub parameters: BTreeMap<String, String>,
}

impl StartupMessage {
    /// Decode the body of an untagged startup frame (length already
    /// stripped). Parameters must fill the body exactly.
    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(VireoError::ShortMessage {
                expected: 4,
                actual: body.len(),
            });
        }
        let mut cursor = ByteCursor::new(body);
        let version = cursor.read_i32()?;
        let version_major = (version >> 16) as i16;
        let version_minor = (version & 0xffff) as i16;

        let mut parameters = BTreeMap::new();
        loop {
            let key = cursor.read_cstring()?;
            if key.is_empty() {
                break;
            }
            let value = cursor.read_cstring()?;
            parameters.insert(key, value);
        }
        if !cursor.is_empty() {
            return Err(VireoError::InvalidMessage(
                "trailing bytes after startup parameters".into(),
            ));
        }

        Ok(Self {
            version_major,
            version_minor,
            parameters,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let version = ((self.version_major as i32) << 16) | (self.version_minor as i32 & 0xffff);
        let mut builder = MessageBuilder::untagged().put_i32(version);
        for (key, value) in &self.parameters {
            builder = builder.put_cstr(key).put_cstr(value);
        }
        builder.put_u8(0).finish()
    }

    pub fn user(&self) -> Option<&str> {
        self.parameters.get("user").map(String::as_str)
    }

    pub fn database(&self) -> Option<&str> {
        self.parameters.get("database").map(String::as_str)
    }

    pub fn application_name(&self) -> Option<&str> {
        self.parameters.get("application_name").map(String::as_str)
    }
}

/// Frontend message after startup, dispatched by tag
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    /// `'Q'` — simple query
    Query { sql: String },
    /// `'P'` — parse into a named prepared statement
    Parse {
        name: String,
        sql: String,
        param_oids: Vec<i32>,
    },
    /// `'B'` — bind a statement to a portal
    Bind {
        portal: String,
        statement: String,
        parameters: Vec<BindParameter>,
        result_formats: Vec<i16>,
    },
    /// `'D'` — describe a statement or portal
    Describe { kind: TargetKind, name: String },
    /// `'E'` — execute a bound portal; `max_rows == 0` means unlimited
    Execute { portal: String, max_rows: i32 },
    /// `'C'` — close a statement or portal
    Close { kind: TargetKind, name: String },
    /// `'S'` — sync point of the extended flow
    Sync,
    /// `'H'` — flush pending output
    Flush,
    /// `'X'` — terminate the connection
    Terminate,
    /// `'p'` — password response during authentication
    Password { password: String },
    /// `'d'` — one COPY data row (raw payload)
    CopyData { data: Vec<u8> },
    /// `'c'` — end of COPY stream
    CopyDone,
    /// `'f'` — client aborts COPY
    CopyFail { message: String },
}

impl FrontendMessage {
    /// Decode a tagged frontend message from its body bytes.
    pub fn decode(tag: u8, body: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(body);
        match tag {
            TAG_QUERY => Ok(FrontendMessage::Query {
                sql: cursor.read_cstring()?,
            }),
            TAG_PARSE => {
                let name = cursor.read_cstring()?;
                let sql = cursor.read_cstring()?;
                let count = cursor.read_i16()?;
                if count < 0 {
                    return Err(VireoError::InvalidLength(count as i32));
                }
                let mut param_oids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    param_oids.push(cursor.read_i32()?);
                }
                Ok(FrontendMessage::Parse {
                    name,
                    sql,
                    param_oids,
                })
            }
            TAG_BIND => Self::decode_bind(&mut cursor),
            TAG_DESCRIBE => {
                let kind = TargetKind::from_u8(cursor.read_u8()?)?;
                let name = cursor.read_cstring()?;
                Ok(FrontendMessage::Describe { kind, name })
            }
            TAG_EXECUTE => {
                let portal = cursor.read_cstring()?;
                let max_rows = cursor.read_i32()?;
                Ok(FrontendMessage::Execute { portal, max_rows })
            }
            TAG_CLOSE => {
                let kind = TargetKind::from_u8(cursor.read_u8()?)?;
                let name = cursor.read_cstring()?;
                Ok(FrontendMessage::Close { kind, name })
            }
            TAG_SYNC => Ok(FrontendMessage::Sync),
            TAG_FLUSH => Ok(FrontendMessage::Flush),
            TAG_TERMINATE => Ok(FrontendMessage::Terminate),
            TAG_PASSWORD => Ok(FrontendMessage::Password {
                password: cursor.read_cstring()?,
            }),
            TAG_COPY_DATA => Ok(FrontendMessage::CopyData {
                data: cursor.read_remaining().to_vec(),
            }),
            TAG_COPY_DONE => Ok(FrontendMessage::CopyDone),
            TAG_COPY_FAIL => Ok(FrontendMessage::CopyFail {
                message: cursor.read_cstring()?,
            }),
            other => Err(VireoError::InvalidMessage(format!(
                "unrecognized frontend message tag: 0x{:02x}",
                other
            ))),
        }
    }

    /// Bind: portal, statement, parameter format codes, parameter values,
    /// result format codes. The parameter format-code list has three legal
    /// sizes: 0 (all text), 1 (broadcast), or exactly the value count.
    fn decode_bind(cursor: &mut ByteCursor<'_>) -> Result<FrontendMessage> {
        let portal = cursor.read_cstring()?;
        let statement = cursor.read_cstring()?;

        let format_count = cursor.read_i16()?;
        if format_count < 0 {
            return Err(VireoError::InvalidLength(format_count as i32));
        }
        let mut formats = Vec::with_capacity(format_count as usize);
        for _ in 0..format_count {
            formats.push(cursor.read_i16()?);
        }

        let value_count = cursor.read_i16()?;
        if value_count < 0 {
            return Err(VireoError::InvalidLength(value_count as i32));
        }
        if formats.len() > 1 && formats.len() != value_count as usize {
            return Err(VireoError::InvalidMessage(format!(
                "bind supplied {} parameter format codes for {} values",
                formats.len(),
                value_count
            )));
        }

        let mut parameters = Vec::with_capacity(value_count as usize);
        for i in 0..value_count as usize {
            let len = cursor.read_i32()?;
            let value = match len {
                -1 => None,
                0 => Some(Vec::new()),
                n if n > 0 => Some(cursor.read_bytes(n as usize)?.to_vec()),
                n => return Err(VireoError::InvalidLength(n)),
            };
            // Missing format code defaults to text; a single code broadcasts.
            let format = match formats.len() {
                0 => FORMAT_TEXT,
                1 => formats[0],
                _ => formats[i],
            };
            parameters.push(BindParameter { format, value });
        }

        let result_format_count = cursor.read_i16()?;
        if result_format_count < 0 {
            return Err(VireoError::InvalidLength(result_format_count as i32));
        }
        let mut result_formats = Vec::with_capacity(result_format_count as usize);
        for _ in 0..result_format_count {
            result_formats.push(cursor.read_i16()?);
        }

        Ok(FrontendMessage::Bind {
            portal,
            statement,
            parameters,
            result_formats,
        })
    }

    /// Encode with tag and length framing.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            FrontendMessage::Query { sql } => {
                MessageBuilder::tagged(TAG_QUERY).put_cstr(sql).finish()
            }
            FrontendMessage::Parse {
                name,
                sql,
                param_oids,
            } => {
                let mut builder = MessageBuilder::tagged(TAG_PARSE)
                    .put_cstr(name)
                    .put_cstr(sql)
                    .put_i16(param_oids.len() as i16);
                for oid in param_oids {
                    builder = builder.put_i32(*oid);
                }
                builder.finish()
            }
            FrontendMessage::Bind {
                portal,
                statement,
                parameters,
                result_formats,
            } => {
                let mut builder = MessageBuilder::tagged(TAG_BIND)
                    .put_cstr(portal)
                    .put_cstr(statement)
                    .put_i16(parameters.len() as i16);
                for param in parameters {
                    builder = builder.put_i16(param.format);
                }
                builder = builder.put_i16(parameters.len() as i16);
                for param in parameters {
                    match &param.value {
                        None => builder = builder.put_i32(-1),
                        Some(bytes) => {
                            builder = builder.put_i32(bytes.len() as i32).put_bytes(bytes)
                        }
                    }
                }
                builder = builder.put_i16(result_formats.len() as i16);
                for format in result_formats {
                    builder = builder.put_i16(*format);
                }
                builder.finish()
            }
            FrontendMessage::Describe { kind, name } => MessageBuilder::tagged(TAG_DESCRIBE)
                .put_u8(kind.as_u8())
                .put_cstr(name)
                .finish(),
            FrontendMessage::Execute { portal, max_rows } => MessageBuilder::tagged(TAG_EXECUTE)
                .put_cstr(portal)
                .put_i32(*max_rows)
                .finish(),
            FrontendMessage::Close { kind, name } => MessageBuilder::tagged(TAG_CLOSE)
                .put_u8(kind.as_u8())
                .put_cstr(name)
                .finish(),
            FrontendMessage::Sync => MessageBuilder::tagged(TAG_SYNC).finish(),
            FrontendMessage::Flush => MessageBuilder::tagged(TAG_FLUSH).finish(),
            FrontendMessage::Terminate => MessageBuilder::tagged(TAG_TERMINATE).finish(),
            FrontendMessage::Password { password } => MessageBuilder::tagged(TAG_PASSWORD)
                .put_cstr(password)
                .finish(),
            FrontendMessage::CopyData { data } => MessageBuilder::tagged(TAG_COPY_DATA)
                .put_bytes(data)
                .finish(),
            FrontendMessage::CopyDone => MessageBuilder::tagged(TAG_COPY_DONE).finish(),
            FrontendMessage::CopyFail { message } => MessageBuilder::tagged(TAG_COPY_FAIL)
                .put_cstr(message)
                .finish(),
        }
    }

    /// The wire tag of this message.
    pub fn tag(&self) -> u8 {
        match self {
            FrontendMessage::Query { .. } => TAG_QUERY,
            FrontendMessage::Parse { .. } => TAG_PARSE,
            FrontendMessage::Bind { .. } => TAG_BIND,
            FrontendMessage::Describe { .. } => TAG_DESCRIBE,
            FrontendMessage::Execute { .. } => TAG_EXECUTE,
            FrontendMessage::Close { .. } => TAG_CLOSE,
            FrontendMessage::Sync => TAG_SYNC,
            FrontendMessage::Flush => TAG_FLUSH,
            FrontendMessage::Terminate => TAG_TERMINATE,
            FrontendMessage::Password { .. } => TAG_PASSWORD,
            FrontendMessage::CopyData { .. } => TAG_COPY_DATA,
            FrontendMessage::CopyDone => TAG_COPY_DONE,
            FrontendMessage::CopyFail { .. } => TAG_COPY_FAIL,
        }
    }
}
