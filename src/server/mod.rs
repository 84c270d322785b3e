//! The readiness loop.
//!
//! One task owns the listener and every connection. Each iteration waits (at
//! most one second) for the listener or any connection to become ready, then
//! handles every ready socket without blocking. Housekeeping runs once per
//! second: connection timers, then the sweep of closed connections.

pub mod listener;

use std::collections::BTreeMap;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::http::connection::{Connection, ConnectionId, ReadOutcome};
use crate::http::writer::WriteProgress;
use crate::pipeline::Pipeline;
use listener::{
    Listener, ListenerError, is_descriptor_exhaustion, is_fatal_accept_error,
    is_transient_accept_error,
};

/// Upper bound of one readiness wait, and the housekeeping period.
pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("server is not bound")]
    NotBound,
    #[error("readiness wait failed: {0}")]
    Multiplex(#[source] io::Error),
}

/// How the loop was started; only daemon children honor
/// `max_requests_per_child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Foreground,
    DaemonChild,
}

/// Asks a running loop to stop from anywhere, including signal handlers.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// The raw flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}

#[derive(Debug, Clone, Copy)]
struct Interest {
    accepting: bool,
    reading: bool,
}

enum Readiness {
    Accepted(TcpStream, SocketAddr),
    AcceptFailed(io::Error),
    Readable(ConnectionId),
    Writable(ConnectionId),
    Exception(ConnectionId, io::Error),
}

pub struct Server {
    config: ServerConfig,
    pipeline: Pipeline,
    listener: Option<Listener>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
    requests: u64,
    shutdown: Arc<AtomicBool>,
    mode: RunMode,
    accept_paused: bool,
}

impl Server {
    /// An unbound server; [`Server::start`] binds it.
    pub fn new(config: ServerConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline,
            listener: None,
            connections: BTreeMap::new(),
            next_id: 0,
            requests: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
            mode: RunMode::Foreground,
            accept_paused: false,
        }
    }

    /// Creates a server and binds its listener. Must run inside a tokio
    /// runtime.
    pub fn bind(config: ServerConfig, pipeline: Pipeline) -> Result<Self, ServerError> {
        let mut server = Self::new(config, pipeline);
        server.bind_listener()?;
        Ok(server)
    }

    fn bind_listener(&mut self) -> Result<(), ServerError> {
        let listener = Listener::bind(
            &self.config.address,
            self.config.port,
            self.config.backlog,
        )?;
        self.listener = Some(listener);
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Listener::local_addr)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn shutdown(&self) {
        self.handle().shutdown();
    }

    /// Whether the last run was a daemon child.
    pub fn is_child(&self) -> bool {
        self.mode == RunMode::DaemonChild
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn requests_served(&self) -> u64 {
        self.requests
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Binds if needed, then runs the loop.
    pub async fn start(&mut self, mode: RunMode) -> Result<(), ServerError> {
        if self.listener.is_none() {
            self.bind_listener()?;
        }
        self.run(mode).await
    }

    /// Runs until shutdown, the request cap, or a multiplexing failure.
    /// Every connection is closed on return.
    pub async fn run(&mut self, mode: RunMode) -> Result<(), ServerError> {
        let listener = self.listener.take().ok_or(ServerError::NotBound)?;
        self.mode = mode;

        info!(
            addr = %listener.local_addr(),
            ?mode,
            max_clients = self.config.max_clients,
            max_requests = self.max_requests(),
            "server started"
        );

        let result = self.event_loop(&listener).await;

        self.listener = Some(listener);
        self.stop();

        match &result {
            Ok(()) => info!(requests = self.requests, "server stopped"),
            Err(e) => error!(error = %e, "server failed"),
        }
        result
    }

    /// Closes and forgets every tracked connection.
    pub fn stop(&mut self) {
        for connection in self.connections.values_mut() {
            connection.close();
        }
        self.connections.clear();
    }

    fn max_requests(&self) -> u64 {
        match self.mode {
            RunMode::DaemonChild => self.config.max_requests_per_child,
            RunMode::Foreground => 0,
        }
    }

    fn request_limit_reached(&self) -> bool {
        let max = self.max_requests();
        max > 0 && self.requests >= max
    }

    async fn event_loop(&mut self, listener: &Listener) -> Result<(), ServerError> {
        let mut last_tick = Instant::now();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested");
                return Ok(());
            }

            let limit_reached = self.request_limit_reached();
            if limit_reached && !self.connections.values().any(Connection::is_waiting) {
                info!(requests = self.requests, "request limit reached");
                return Ok(());
            }

            let interest = Interest {
                accepting: !limit_reached
                    && !self.accept_paused
                    && self.connections.len() < self.config.max_clients,
                reading: !limit_reached,
            };

            let events = {
                let connections = &self.connections;
                let wait = poll_fn(|cx| poll_readiness(listener, connections, interest, cx));
                tokio::time::timeout(TICK, wait).await.unwrap_or_default()
            };

            for event in events {
                match event {
                    Readiness::Accepted(stream, peer) => self.register(stream, peer),
                    Readiness::AcceptFailed(e) => {
                        if is_fatal_accept_error(&e) {
                            return Err(ServerError::Multiplex(e));
                        }
                        if is_descriptor_exhaustion(&e) {
                            error!(error = %e, "accept failed, out of descriptors");
                        } else {
                            warn!(error = %e, "accept failed");
                        }
                        self.accept_paused = true;
                    }
                    Readiness::Readable(id) => {
                        if !self.request_limit_reached() {
                            self.handle_readable(id);
                        }
                    }
                    Readiness::Writable(id) => self.handle_writable(id),
                    Readiness::Exception(id, e) => {
                        if let Some(connection) = self.connections.get_mut(&id) {
                            debug!(id = %id, error = %e, "socket error");
                            connection.close();
                        }
                    }
                }
            }

            let now = Instant::now();
            if now.duration_since(last_tick) >= TICK {
                last_tick = now;
                self.housekeeping(now);
            }

            self.connections.retain(|_, connection| connection.is_connected());
        }
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        let connection = Connection::new(id, stream, peer, self.config.timeouts());
        debug!(id = %id, peer = %peer, "accepted connection");
        self.connections.insert(id, connection);
    }

    fn handle_readable(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };

        let request = match connection.read_request() {
            ReadOutcome::Request(request) => request,
            ReadOutcome::Pending => return,
            ReadOutcome::PeerClosed => {
                debug!(id = %id, "peer closed");
                connection.close();
                return;
            }
            ReadOutcome::Malformed(e) => {
                debug!(id = %id, peer = %connection.peer(), error = %e, "malformed request");
                connection.close();
                return;
            }
            ReadOutcome::Failed(e) => {
                debug!(id = %id, error = %e, "read failed");
                connection.close();
                return;
            }
        };

        self.requests += 1;

        let response = match self.pipeline.dispatch(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(id = %id, error = %e, "dispatch failed");
                connection.close();
                return;
            }
        };

        info!(
            id = %id,
            method = %request.method,
            target = %request.target,
            status = response.status.as_u16(),
            "request served"
        );

        match connection.send_response(&request, response) {
            Ok(WriteProgress::Complete) => {}
            Ok(WriteProgress::Blocked) => debug!(id = %id, "write blocked"),
            Err(e) => {
                debug!(id = %id, error = %e, "write failed");
                connection.close();
            }
        }
    }

    fn handle_writable(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };

        if let Err(e) = connection.flush() {
            debug!(id = %id, error = %e, "write failed");
            connection.close();
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        self.accept_paused = false;

        for connection in self.connections.values_mut() {
            connection.timer(now);
        }

        let statistics = self.pipeline.statistics().map(|s| s.snapshot());
        debug!(
            connections = self.connections.len(),
            requests = self.requests,
            responses = statistics.map(|s| s.total()),
            "status"
        );
    }
}

/// One pass over every socket of interest. Ready only when at least one
/// event was collected.
fn poll_readiness(
    listener: &Listener,
    connections: &BTreeMap<ConnectionId, Connection>,
    interest: Interest,
    cx: &mut Context<'_>,
) -> Poll<Vec<Readiness>> {
    let mut events = Vec::new();

    while interest.accepting {
        match listener.poll_accept(cx) {
            Poll::Ready(Ok((stream, peer))) => {
                events.push(Readiness::Accepted(stream, peer));
                break;
            }
            Poll::Ready(Err(e)) if is_transient_accept_error(&e) => {
                debug!(error = %e, "transient accept failure");
            }
            Poll::Ready(Err(e)) => {
                events.push(Readiness::AcceptFailed(e));
                break;
            }
            Poll::Pending => break,
        }
    }

    for (id, connection) in connections {
        if connection.is_waiting() {
            match connection.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => events.push(Readiness::Writable(*id)),
                Poll::Ready(Err(e)) => events.push(Readiness::Exception(*id, e)),
                Poll::Pending => {}
            }
        } else if !interest.reading {
            continue;
        } else if connection.has_pending_input() {
            events.push(Readiness::Readable(*id));
        } else if connection.wants_read() {
            match connection.poll_read_ready(cx) {
                Poll::Ready(Ok(())) => events.push(Readiness::Readable(*id)),
                Poll::Ready(Err(e)) => events.push(Readiness::Exception(*id, e)),
                Poll::Pending => {}
            }
        }
    }

    if events.is_empty() {
        Poll::Pending
    } else {
        Poll::Ready(events)
    }
}
