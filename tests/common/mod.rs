//! Shared helpers: a server on its own thread and a blocking HTTP client.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hearth::config::ServerConfig;
use hearth::http::request::Request;
use hearth::http::response::Response;
use hearth::pipeline::Pipeline;
use hearth::server::{RunMode, Server, ServerError, ServerHandle};

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// `/info` answers `ok`; everything else falls through.
pub fn info_pipeline() -> Pipeline {
    Pipeline::new().with_handler(|req: &Request| -> Option<Response> {
        (req.path() == "/info").then(|| Response::ok("ok"))
    })
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    thread: Option<JoinHandle<Result<u64, ServerError>>>,
}

impl TestServer {
    /// Binds on an ephemeral port and runs the loop on a dedicated
    /// current-thread runtime.
    pub fn spawn(config: ServerConfig, pipeline: Pipeline, mode: RunMode) -> Self {
        let (tx, rx) = mpsc::channel();

        let thread = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let mut server = Server::bind(config, pipeline)?;
                tx.send((server.local_addr().unwrap(), server.handle()))
                    .unwrap();
                server.run(mode).await?;
                assert_eq!(server.connection_count(), 0);
                Ok::<_, ServerError>(server.requests_served())
            })
        });

        let (addr, handle) = rx.recv().expect("server failed to bind");
        Self {
            addr,
            handle,
            thread: Some(thread),
        }
    }

    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).unwrap();
        stream.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();
        stream
    }

    /// Waits for the loop to return on its own; yields the request count.
    pub fn join(mut self) -> u64 {
        self.thread
            .take()
            .unwrap()
            .join()
            .expect("server thread panicked")
            .expect("server failed")
    }

    pub fn shutdown(self) -> u64 {
        self.handle.shutdown();
        self.join()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A response as it came off the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_content_headers(&self) -> bool {
        self.headers
            .iter()
            .any(|(key, _)| key.to_ascii_lowercase().starts_with("content-"))
    }
}

pub fn send(stream: &mut TcpStream, raw: &str) {
    stream.write_all(raw.as_bytes()).unwrap();
}

/// Reads one response head plus `Content-Length` body bytes.
pub fn read_response(stream: &mut TcpStream) -> RawResponse {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).unwrap();
        assert!(n > 0, "connection closed mid-response: {head:?}");
        head.push(byte[0]);
    }

    let head = String::from_utf8(head).unwrap();
    let mut lines = head.trim_end().split("\r\n");
    let status_line = lines.next().unwrap().to_string();
    let headers: Vec<(String, String)> = lines
        .map(|line| {
            let (key, value) = line.split_once(": ").unwrap();
            (key.to_string(), value.to_string())
        })
        .collect();

    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, value)| value.parse::<usize>().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).unwrap();

    RawResponse {
        status_line,
        headers,
        body,
    }
}

/// Reads until the server closes the connection.
pub fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    rest
}
