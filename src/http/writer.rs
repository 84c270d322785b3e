use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::TcpStream;

use crate::http::request::Version;
use crate::http::response::Response;

/// Serializes a response into its wire form.
///
/// HTTP/0.9 responses are the bare body with no status line or headers.
pub fn encode_response(resp: &Response) -> Bytes {
    let body = resp.body.as_deref().unwrap_or_default();

    if resp.version == Version::Http09 {
        return Bytes::copy_from_slice(body);
    }

    let mut buf = BytesMut::with_capacity(256 + body.len());

    // Status line
    buf.put_slice(resp.version.to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(resp.status.as_u16().to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(resp.status_text.as_bytes());
    buf.put_slice(b"\r\n");

    for (k, v) in resp.headers.iter() {
        buf.put_slice(k.trim().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.trim().as_bytes());
        buf.put_slice(b"\r\n");
    }

    // Header/body separator
    buf.put_slice(b"\r\n");

    buf.put_slice(body);

    buf.freeze()
}

/// Outcome of a non-blocking flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Every byte reached the socket.
    Complete,
    /// The socket stopped accepting bytes; retry once it is writable.
    Blocked,
}

/// A serialized response plus how much of it has been written so far.
#[derive(Debug)]
pub struct ResponseWriter {
    buffer: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: encode_response(response),
            written: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.written
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.buffer.len()
    }

    /// Writes as much as the socket takes without blocking.
    pub fn write_to_stream(&mut self, stream: &TcpStream) -> io::Result<WriteProgress> {
        while self.written < self.buffer.len() {
            match stream.try_write(&self.buffer[self.written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(WriteProgress::Blocked);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(WriteProgress::Complete)
    }
}
