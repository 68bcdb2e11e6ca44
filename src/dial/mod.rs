//! Scope-bounded connection establishment.
//!
//! # The dial race
//!
//! Connecting (and optionally handshaking) runs on a background task that
//! writes its one outcome into a single-slot buffer. The caller races that
//! slot against its scope:
//!
//! ```text
//!   establish(scope)
//!     ├─ spawn ─▶ attempt: connect ─▶ handshake ─▶ slot.offer(outcome)
//!     │                    (gives up when the scope finishes)
//!     └─ select ─┬─ scope.done()  ─▶ Canceled / DeadlineExceeded
//!                └─ slot.recv()   ─▶ Connection / classified error
//! ```
//!
//! The slot holds one value and never blocks its writer. Whatever loses the
//! race is dropped: an attempt that finishes after the caller gave up finds
//! the slot closed and releases its connection. The attempt itself runs
//! under a child of the caller's scope, so it never outlives that scope.
//!
//! Failures are classified: a connect failure is
//! [`NetworkUnreachable`](DialError::NetworkUnreachable), a failure after
//! the socket is up is [`HandshakeFailed`](DialError::HandshakeFailed).

pub mod tls;

mod slot;

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use self::slot::ResultSlot;
use self::tls::Handshake;
use crate::error::DialError;
use crate::scope::CallScope;

// ── Connection ────────────────────────────────────────────────────────────────

/// Byte stream a dial produces: plain TCP or whatever a handshake wrapped it in.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// An established connection.
pub struct Connection {
    io: BoxedIo,
    peer: SocketAddr,
    secure: bool,
}

impl Connection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether a handshake ran on this connection.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn into_io(self) -> BoxedIo {
        self.io
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

/// TCP keepalive probes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeepAlive {
    /// Idle time before the first probe.
    pub time: Duration,
    /// Time between unanswered probes.
    pub interval: Duration,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self { time: Duration::from_secs(10), interval: Duration::from_secs(10) }
    }
}

#[derive(Clone)]
pub struct DialOptions {
    timeout: Option<Duration>,
    nodelay: bool,
    keepalive: Option<KeepAlive>,
    handshake: Option<Arc<dyn Handshake>>,
}

impl DialOptions {
    /// Bounds the whole dial, on top of whatever deadline the scope has.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn keepalive(mut self, keepalive: KeepAlive) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    /// Runs `handshake` once the socket is connected.
    pub fn handshake(mut self, handshake: impl Handshake) -> Self {
        self.handshake = Some(Arc::new(handshake));
        self
    }
}

impl Default for DialOptions {
    fn default() -> Self {
        Self { timeout: None, nodelay: true, keepalive: None, handshake: None }
    }
}

// ── Dialer ────────────────────────────────────────────────────────────────────

/// Dials one `host:port` address.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use conduit::CallScope;
/// use conduit::dial::{DialOptions, Dialer};
/// use conduit::dial::tls::{Roots, TlsConfig, TlsHandshake};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let tls = TlsHandshake::new(&TlsConfig::new(Roots::WebPki))?;
/// let dialer = Dialer::new("api.example.com:443")
///     .options(DialOptions::default().timeout(Duration::from_secs(5)).handshake(tls));
///
/// let conn = dialer.establish(&CallScope::new("/dial")).await?;
/// assert!(conn.is_secure());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Dialer {
    address: String,
    options: DialOptions,
}

impl Dialer {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), options: DialOptions::default() }
    }

    /// Joins `host` and `port`, bracketing IPv6 literals.
    pub fn host_port(host: &str, port: u16) -> Self {
        if host.contains(':') && !host.starts_with('[') {
            Self::new(format!("[{host}]:{port}"))
        } else {
            Self::new(format!("{host}:{port}"))
        }
    }

    pub fn options(mut self, options: DialOptions) -> Self {
        self.options = options;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connects within `scope`.
    ///
    /// Returns exactly one outcome: the connection, or the first of the
    /// scope finishing and the attempt failing. An empty address fails
    /// before anything is spawned.
    pub async fn establish(&self, scope: &CallScope) -> Result<Connection, DialError> {
        if self.address.is_empty() {
            return Err(DialError::InvalidArgument("empty address".to_owned()));
        }

        let scope = match self.options.timeout {
            Some(timeout) => scope.child().with_timeout(timeout),
            None => scope.child(),
        };
        // returning, or being dropped, stops an attempt still in flight
        let _stop = scope.token().clone().drop_guard();

        let (slot, mut outcome) = slot::channel();
        let attempt = Attempt {
            address: self.address.clone(),
            options: self.options.clone(),
            scope: scope.clone(),
            slot,
        };
        tokio::spawn(attempt.run());

        tokio::select! {
            biased;
            err = scope.done() => {
                debug!(addr = %self.address, "dial gave up: {err}");
                Err(err.into())
            }
            result = outcome.recv() => result.unwrap_or(Err(DialError::Canceled)),
        }
    }
}

// ── Attempt ───────────────────────────────────────────────────────────────────

struct Attempt {
    address: String,
    options: DialOptions,
    scope: CallScope,
    slot: ResultSlot,
}

impl Attempt {
    async fn run(self) {
        let outcome = tokio::select! {
            biased;
            err = self.scope.done() => Err(err.into()),
            result = self.connect() => result,
        };

        if let Ok(conn) = &outcome {
            info!(addr = %self.address, peer = %conn.peer, secure = conn.secure, "connection established");
        }
        if !self.slot.offer(outcome) {
            debug!(addr = %self.address, "dial outcome discarded");
        }
    }

    async fn connect(&self) -> Result<Connection, DialError> {
        let unreachable = |source| DialError::NetworkUnreachable { addr: self.address.clone(), source };

        let stream = TcpStream::connect(&self.address).await.map_err(unreachable)?;
        self.tune(&stream).map_err(unreachable)?;
        let peer = stream.peer_addr().map_err(unreachable)?;

        let Some(handshake) = &self.options.handshake else {
            return Ok(Connection { io: Box::new(stream), peer, secure: false });
        };

        let io = handshake
            .handshake(server_name(&self.address), stream)
            .await
            .map_err(|source| DialError::HandshakeFailed { addr: self.address.clone(), source })?;
        Ok(Connection { io, peer, secure: true })
    }

    fn tune(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.options.nodelay)?;
        if let Some(keepalive) = self.options.keepalive {
            let params = TcpKeepalive::new().with_time(keepalive.time);
            #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos", target_os = "freebsd", windows))]
            let params = params.with_interval(keepalive.interval);
            SockRef::from(stream).set_tcp_keepalive(&params)?;
        }
        Ok(())
    }
}

/// Host part of a `host:port` address, without IPv6 brackets.
fn server_name(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_strips_port_and_brackets() {
        assert_eq!(server_name("api.example.com:443"), "api.example.com");
        assert_eq!(server_name("[::1]:8443"), "::1");
        assert_eq!(server_name("localhost"), "localhost");
    }

    #[test]
    fn host_port_brackets_ipv6() {
        assert_eq!(Dialer::host_port("::1", 80).address(), "[::1]:80");
        assert_eq!(Dialer::host_port("example.com", 80).address(), "example.com:80");
    }
}
