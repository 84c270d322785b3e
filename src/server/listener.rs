use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::task::{Context, Poll};

use nix::errno::Errno;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::info;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
    #[error("port {0} is out of range")]
    InvalidPort(u32),
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// The bound, non-blocking server socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Binds `address:port` with `SO_REUSEADDR` set.
    ///
    /// `*` binds every IPv4 interface. Port `0` picks an ephemeral port; the
    /// actual one is available from [`Listener::local_addr`].
    pub fn bind(address: &str, port: u32, backlog: u32) -> Result<Self, ListenerError> {
        let ip = normalize_address(address)?;
        let port = u16::try_from(port).map_err(|_| ListenerError::InvalidPort(port))?;
        let addr = SocketAddr::new(ip, port);

        let bind = |addr: SocketAddr| -> io::Result<TcpListener> {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.set_reuseaddr(true)?;
            socket.bind(addr)?;
            socket.listen(backlog)
        };

        let inner = bind(addr).map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        info!(addr = %local_addr, backlog, "listening");

        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Polls for one pending connection without blocking.
    pub fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        self.inner.poll_accept(cx)
    }
}

/// Maps `*` to the IPv4 wildcard and rejects anything that is not an IP
/// literal.
pub fn normalize_address(address: &str) -> Result<IpAddr, ListenerError> {
    let address = address.trim();
    if address == "*" {
        return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    address
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|_| ListenerError::InvalidAddress(address.to_string()))
}

/// Accept errors that only affect the connection being accepted.
pub fn is_transient_accept_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Process or system descriptor table exhaustion.
pub fn is_descriptor_exhaustion(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(code) if code == Errno::EMFILE as i32 || code == Errno::ENFILE as i32
    )
}

/// Errors that mean the listening socket itself is unusable.
pub fn is_fatal_accept_error(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(code) if code == Errno::EBADF as i32
            || code == Errno::EINVAL as i32
            || code == Errno::ENOTSOCK as i32
    )
}
