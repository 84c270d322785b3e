//! Hearth - embedded HTTP server
//!
//! A single-threaded readiness loop serving HTTP/0.9, 1.0 and 1.1 through a
//! pluggable handler and filter pipeline, with an optional forking daemon
//! supervisor.

pub mod config;
pub mod daemon;
pub mod http;
pub mod pipeline;
pub mod server;
