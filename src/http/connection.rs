use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use md5::{Digest, Md5};
use tokio::net::TcpStream;
use tracing::debug;

use crate::http::parser::{ParseError, decode_request};
use crate::http::request::{Request, Version};
use crate::http::response::Response;
use crate::http::writer::{ResponseWriter, WriteProgress};

/// Bytes requested from the socket per readable event.
const READ_CHUNK: usize = 16 * 1024;

/// Upper bound on buffered, not yet parsed request bytes.
pub const MAX_BUFFERED_BYTES: usize = 8 * 1024 * 1024;

/// Value of the `Server` and `Via` headers.
pub const SERVER_SIGNATURE: &str = concat!("hearth/", env!("CARGO_PKG_VERSION"));

/// Opaque identifier of a tracked client socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifetime limits of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum lifetime since accept.
    pub total: Duration,
    /// Maximum silence since the last read or completed write.
    pub idle: Duration,
}

#[derive(Debug)]
pub enum ConnectionState {
    /// Idle, nothing buffered.
    AwaitingRequest,
    /// Part of a request has arrived.
    Buffering,
    /// A request was handed to the pipeline; reads are paused.
    Dispatched,
    /// A response is being flushed.
    Writing(ResponseWriter),
    Closed,
}

/// What a readable event produced.
#[derive(Debug)]
pub enum ReadOutcome {
    Request(Request),
    /// No complete message yet (or the read would block).
    Pending,
    /// The peer closed its side.
    PeerClosed,
    Malformed(ParseError),
    Failed(io::Error),
}

/// One accepted client socket and its protocol state.
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    buffer: BytesMut,
    state: ConnectionState,
    keep_alive: bool,
    pending_input: bool,
    timeouts: Timeouts,
    accepted_at: Instant,
    last_activity: Instant,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, peer: SocketAddr, timeouts: Timeouts) -> Self {
        let now = Instant::now();
        Self {
            id,
            stream,
            peer,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::AwaitingRequest,
            keep_alive: false,
            pending_input: false,
            timeouts,
            accepted_at: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Keep-alive flag negotiated by the most recent request.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.state, ConnectionState::Closed)
    }

    /// Write-blocked: the last response has not been flushed in full.
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, ConnectionState::Writing(_))
    }

    /// Whether the socket belongs in the read set.
    pub fn wants_read(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::AwaitingRequest | ConnectionState::Buffering
        )
    }

    /// Bytes of a following request were already buffered when the previous
    /// exchange completed, so no readiness event will announce them.
    pub fn has_pending_input(&self) -> bool {
        self.pending_input && self.wants_read()
    }

    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_read_ready(cx)
    }

    pub fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.poll_write_ready(cx)
    }

    /// Reads what the socket has and tries to decode one request.
    ///
    /// Already-buffered bytes are tried first, the same as after a fresh read.
    pub fn read_request(&mut self) -> ReadOutcome {
        if !self.wants_read() {
            return ReadOutcome::Pending;
        }

        if self.pending_input {
            self.pending_input = false;
            if let Some(outcome) = self.try_decode() {
                return outcome;
            }
        }

        self.buffer.reserve(READ_CHUNK);
        match self.stream.try_read_buf(&mut self.buffer) {
            Ok(0) => return ReadOutcome::PeerClosed,
            Ok(n) => {
                self.last_activity = Instant::now();
                debug!(id = %self.id, bytes = n, "read");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Pending,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return ReadOutcome::Pending,
            Err(e) => return ReadOutcome::Failed(e),
        }

        if self.buffer.len() > MAX_BUFFERED_BYTES {
            return ReadOutcome::Malformed(ParseError::TooLarge);
        }

        self.try_decode().unwrap_or(ReadOutcome::Pending)
    }

    fn try_decode(&mut self) -> Option<ReadOutcome> {
        match decode_request(&self.buffer) {
            Ok((request, consumed)) => {
                self.buffer.advance(consumed);
                self.keep_alive = request.keep_alive();
                self.state = ConnectionState::Dispatched;
                Some(ReadOutcome::Request(request))
            }
            Err(ParseError::Incomplete) => {
                if !self.buffer.is_empty() {
                    self.state = ConnectionState::Buffering;
                }
                None
            }
            Err(e) => Some(ReadOutcome::Malformed(e)),
        }
    }

    /// Finalizes `response` for `request`, then starts writing it.
    pub fn send_response(
        &mut self,
        request: &Request,
        mut response: Response,
    ) -> io::Result<WriteProgress> {
        self.finalize(request, &mut response);
        self.state = ConnectionState::Writing(ResponseWriter::new(&response));
        self.flush()
    }

    /// Continues a write-blocked response.
    pub fn flush(&mut self) -> io::Result<WriteProgress> {
        let ConnectionState::Writing(writer) = &mut self.state else {
            return Ok(WriteProgress::Complete);
        };

        let before = writer.remaining();
        let progress = writer.write_to_stream(&self.stream)?;
        if writer.remaining() < before {
            self.last_activity = Instant::now();
        }
        if progress == WriteProgress::Complete {
            self.complete_exchange();
        }
        Ok(progress)
    }

    fn complete_exchange(&mut self) {
        if !self.keep_alive {
            self.close();
            return;
        }

        if self.buffer.is_empty() {
            self.state = ConnectionState::AwaitingRequest;
        } else {
            self.state = ConnectionState::Buffering;
            self.pending_input = true;
        }
    }

    /// Applies the connection-level headers and the body rules.
    pub fn finalize(&self, request: &Request, response: &mut Response) {
        if request.version == Version::Http09 {
            response.version = Version::Http09;
        }

        if response.allows_body(request) {
            let body = response.body.as_deref().unwrap_or_default();
            let digest = hex::encode(Md5::digest(body));
            response.headers.set("Content-Length", body.len().to_string());
            response.headers.set("Content-MD5", digest);
        } else {
            response.strip_body();
        }

        if self.keep_alive {
            response.headers.set("Connection", "Keep-Alive");
            response.headers.set(
                "Keep-Alive",
                format!(
                    "timeout={} max={}",
                    self.timeouts.idle.as_secs(),
                    self.timeouts.total.as_secs()
                ),
            );
        } else {
            response.headers.set("Connection", "close");
            response.headers.remove("Keep-Alive");
        }

        response.headers.set("Server", SERVER_SIGNATURE);
        response.headers.set("Via", SERVER_SIGNATURE);

        if !response.headers.contains("Date") {
            response.headers.set("Date", http_date());
        }
    }

    /// Closes the connection once it outlived either timeout.
    ///
    /// Returns `true` when this call closed it.
    pub fn timer(&mut self, now: Instant) -> bool {
        if !self.is_connected() {
            return false;
        }

        let total = now.saturating_duration_since(self.accepted_at);
        let idle = now.saturating_duration_since(self.last_activity);

        if total > self.timeouts.total || idle > self.timeouts.idle {
            debug!(
                id = %self.id,
                peer = %self.peer,
                total_secs = total.as_secs(),
                idle_secs = idle.as_secs(),
                "connection timed out"
            );
            self.close();
            return true;
        }

        false
    }

    /// Marks the connection closed; the socket is released when the loop
    /// drops it.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.pending_input = false;
        self.buffer.clear();
    }
}

/// Current time as an RFC 1123 date.
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
