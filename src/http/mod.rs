//! HTTP protocol implementation.
//!
//! This module implements the HTTP/0.9, 1.0 and 1.1 wire protocol used by the
//! server loop, with persistent connections driven by non-blocking reads and
//! writes.
//!
//! # Architecture
//!
//! - **`headers`**: Case-insensitive, order-preserving header collection
//! - **`request`**: HTTP request representation, methods and versions
//! - **`response`**: HTTP response representation with builder pattern
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`writer`**: Serializes responses and flushes them without blocking
//! - **`connection`**: Per-socket state machine, finalization and timeouts
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine. The server loop only
//! touches a connection when the socket is ready, so no step ever blocks:
//!
//! ```text
//!        ┌──────────────────┐
//!        │ AwaitingRequest  │ ← In the read set, nothing buffered
//!        └──────┬───────────┘
//!               │ Bytes arrive
//!               ▼
//!        ┌──────────────────┐
//!        │    Buffering     │ ← Partial request held in the buffer
//!        └──────┬───────────┘
//!               │ Request complete
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatched     │ ← Pipeline builds the response
//!        └──────┬───────────┘
//!               │ Response finalized
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← In the write set until flushed
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → AwaitingRequest / Buffering
//!               └─ Close → Closed
//! ```
//!
//! Any state may move to `Closed` on a timeout, a peer hang-up or a socket
//! error.

pub mod connection;
pub mod headers;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
