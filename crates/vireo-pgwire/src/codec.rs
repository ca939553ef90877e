//! Byte-level codec for the wire protocol
//!
//! A peekable big-endian reader over any async byte source, a cursor for
//! decoding message bodies already in memory, and the single builder all
//! backend encoders frame through. The length field of every framed message
//! includes its own four bytes and never the tag byte.

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use vireo_common::{Result, VireoError};

/// Peekable reader over an async byte stream.
///
/// `peek` retains bytes in a small internal buffer so the next read returns
/// them again; everything else consumes.
pub struct MessageReader<S> {
    inner: S,
    peeked: Vec<u8>,
}

impl<S: AsyncRead + Unpin> MessageReader<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            peeked: Vec::new(),
        }
    }

    /// Read exactly `n` bytes, draining any peeked bytes first. A short read
    /// (EOF mid-message) surfaces as an I/O error.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        if !self.peeked.is_empty() {
            let take = n.min(self.peeked.len());
            out.extend(self.peeked.drain(..take));
        }
        if out.len() < n {
            let start = out.len();
            out.resize(n, 0);
            self.inner.read_exact(&mut out[start..]).await?;
        }
        Ok(out)
    }

    /// Read `n` bytes but keep them buffered for the next read.
    pub async fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.peeked.len() < n {
            let mut chunk = vec![0u8; n - self.peeked.len()];
            let read = self.inner.read(&mut chunk).await?;
            if read == 0 {
                return Err(VireoError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while peeking",
                )));
            }
            self.peeked.extend_from_slice(&chunk[..read]);
        }
        Ok(self.peeked[..n].to_vec())
    }

    /// Peek a single byte.
    pub async fn peek_u8(&mut self) -> Result<u8> {
        Ok(self.peek(1).await?[0])
    }

    /// Peek a single byte with a deadline; `Ok(None)` when no byte arrived
    /// in time. Used by "is there a next message?" checks.
    pub async fn peek_u8_timeout(&mut self, deadline: std::time::Duration) -> Result<Option<u8>> {
        match tokio::time::timeout(deadline, self.peek_u8()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1).await?[0])
    }

    pub async fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_exact(2).await?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_exact(4).await?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub async fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.read_exact(2).await?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub async fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_exact(4).await?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read bytes until `delim`, consuming but excluding the delimiter.
    pub async fn read_until(&mut self, delim: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let byte = self.read_u8().await?;
            if byte == delim {
                return Ok(out);
            }
            out.push(byte);
        }
    }

    /// Read a null-terminated UTF-8 string, consuming the terminator.
    pub async fn read_cstring(&mut self) -> Result<String> {
        let bytes = self.read_until(0).await?;
        String::from_utf8(bytes)
            .map_err(|e| VireoError::InvalidMessage(format!("invalid UTF-8 in string: {}", e)))
    }

    /// Access the underlying stream (used when handing the socket to TLS).
    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// Cursor over a message body already read into memory.
///
/// Mirrors [`MessageReader`] for the decode path: type-specific decoders
/// consume exactly the body the envelope declared.
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(VireoError::ShortMessage {
                expected: n,
                actual: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Null-terminated UTF-8 string; consumes the terminator.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            VireoError::InvalidMessage("unterminated string in message body".into())
        })?;
        let s = String::from_utf8(rest[..end].to_vec())
            .map_err(|e| VireoError::InvalidMessage(format!("invalid UTF-8 in string: {}", e)))?;
        self.pos += end + 1;
        Ok(s)
    }

    /// Everything left in the body.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

/// Builds one framed message: optional tag, then `i32` length covering the
/// body plus the length field itself.
pub struct MessageBuilder {
    tag: Option<u8>,
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn tagged(tag: u8) -> Self {
        Self {
            tag: Some(tag),
            body: Vec::new(),
        }
    }

    /// Startup-phase messages carry no tag byte.
    pub fn untagged() -> Self {
        Self {
            tag: None,
            body: Vec::new(),
        }
    }

    pub fn put_u8(mut self, v: u8) -> Self {
        self.body.put_u8(v);
        self
    }

    pub fn put_i16(mut self, v: i16) -> Self {
        self.body.put_i16(v);
        self
    }

    pub fn put_i32(mut self, v: i32) -> Self {
        self.body.put_i32(v);
        self
    }

    pub fn put_u32(mut self, v: u32) -> Self {
        self.body.put_u32(v);
        self
    }

    pub fn put_bytes(mut self, v: &[u8]) -> Self {
        self.body.put_slice(v);
        self
    }

    pub fn put_cstr(mut self, v: &str) -> Self {
        self.body.put_slice(v.as_bytes());
        self.body.put_u8(0);
        self
    }

    /// Frame the buffered body.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 5);
        if let Some(tag) = self.tag {
            out.push(tag);
        }
        out.extend_from_slice(&((self.body.len() as i32 + 4).to_be_bytes()));
        out.extend_from_slice(&self.body);
        out
    }
}
