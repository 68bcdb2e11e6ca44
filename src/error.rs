//! Infrastructure error types.

use std::io;

use crate::scope::ScopeError;
use crate::status::{Code, Status};

/// The error type returned by conduit's construction and lifecycle operations.
///
/// Call-level failures (a rejected credential, an unknown method) are
/// expressed as [`Status`] values, not as `Error`s. This type surfaces
/// misconfiguration that is caught before the first call: an invalid chain,
/// unreadable TLS material, or a harness used out of order.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid chain: {0}")]
    Chain(String),

    #[error("tls: {0}")]
    Tls(String),

    #[error("server already started")]
    AlreadyStarted,
}

/// The single classified failure of a dial race.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("target connection parameter missing: {0}")]
    InvalidArgument(String),

    #[error("network unreachable: {addr}: {source}")]
    NetworkUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("handshake with {addr} failed: {source}")]
    HandshakeFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("dial canceled")]
    Canceled,

    #[error("dial deadline exceeded")]
    DeadlineExceeded,
}

impl DialError {
    /// The status code a caller would report this failure under.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_)        => Code::InvalidArgument,
            Self::NetworkUnreachable { .. } => Code::Unavailable,
            Self::HandshakeFailed { .. }    => Code::Unavailable,
            Self::Canceled                  => Code::Canceled,
            Self::DeadlineExceeded          => Code::DeadlineExceeded,
        }
    }
}

impl From<ScopeError> for DialError {
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::Canceled         => Self::Canceled,
            ScopeError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

impl From<DialError> for Status {
    fn from(e: DialError) -> Self {
        Status::new(e.code(), e.to_string())
    }
}
