//! Call outcome codes as a typed enum.
//!
//! Every call that goes through a chain ends in either a [`Response`] or a
//! [`Status`]. The code set is the canonical RPC one, so a status produced
//! here reads the same to any peer that speaks it.
//!
//! ```rust
//! use conduit::{Code, Severity, Status};
//!
//! let status = Status::unauthenticated("authorization token is not supplied");
//! assert_eq!(status.code(), Code::Unauthenticated);
//!
//! // client-caused codes are warnings, server-caused codes are errors
//! assert_eq!(Code::Unauthenticated.severity(), Severity::Warning);
//! assert_eq!(Code::Internal.severity(), Severity::Error);
//! ```
//!
//! [`Response`]: crate::Response

use std::fmt;

/// Canonical RPC status codes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Code {
    Ok,                 // 0
    Canceled,           // 1
    Unknown,            // 2
    InvalidArgument,    // 3
    DeadlineExceeded,   // 4
    NotFound,           // 5
    AlreadyExists,      // 6
    PermissionDenied,   // 7
    ResourceExhausted,  // 8
    FailedPrecondition, // 9
    Aborted,            // 10
    OutOfRange,         // 11
    Unimplemented,      // 12
    Internal,           // 13
    Unavailable,        // 14
    DataLoss,           // 15
    Unauthenticated,    // 16
}

impl Code {
    /// Returns the upper-snake wire name (e.g. `"DEADLINE_EXCEEDED"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok                 => "OK",
            Self::Canceled           => "CANCELED",
            Self::Unknown            => "UNKNOWN",
            Self::InvalidArgument    => "INVALID_ARGUMENT",
            Self::DeadlineExceeded   => "DEADLINE_EXCEEDED",
            Self::NotFound           => "NOT_FOUND",
            Self::AlreadyExists      => "ALREADY_EXISTS",
            Self::PermissionDenied   => "PERMISSION_DENIED",
            Self::ResourceExhausted  => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted            => "ABORTED",
            Self::OutOfRange         => "OUT_OF_RANGE",
            Self::Unimplemented      => "UNIMPLEMENTED",
            Self::Internal           => "INTERNAL",
            Self::Unavailable        => "UNAVAILABLE",
            Self::DataLoss           => "DATA_LOSS",
            Self::Unauthenticated    => "UNAUTHENTICATED",
        }
    }

    /// The HTTP status a gateway would answer with for this code.
    ///
    /// `Canceled` maps to the non-standard `499 Client Closed Request`.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Ok                 => 200,
            Self::Canceled           => 499,
            Self::Unknown            => 500,
            Self::InvalidArgument    => 400,
            Self::DeadlineExceeded   => 504,
            Self::NotFound           => 404,
            Self::AlreadyExists      => 409,
            Self::PermissionDenied   => 403,
            Self::ResourceExhausted  => 429,
            Self::FailedPrecondition => 400,
            Self::Aborted            => 409,
            Self::OutOfRange         => 400,
            Self::Unimplemented      => 501,
            Self::Internal           => 500,
            Self::Unavailable        => 503,
            Self::DataLoss           => 500,
            Self::Unauthenticated    => 401,
        }
    }

    /// Log severity for a call that terminated with this code.
    ///
    /// Derived from [`http_status`](Code::http_status): below 400 is routine,
    /// 4xx is the caller's fault, 5xx is ours.
    pub fn severity(self) -> Severity {
        match self.http_status() {
            0..=399   => Severity::Info,
            400..=499 => Severity::Warning,
            _         => Severity::Error,
        }
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        match code {
            Code::Ok                 => 0,
            Code::Canceled           => 1,
            Code::Unknown            => 2,
            Code::InvalidArgument    => 3,
            Code::DeadlineExceeded   => 4,
            Code::NotFound           => 5,
            Code::AlreadyExists      => 6,
            Code::PermissionDenied   => 7,
            Code::ResourceExhausted  => 8,
            Code::FailedPrecondition => 9,
            Code::Aborted            => 10,
            Code::OutOfRange         => 11,
            Code::Unimplemented      => 12,
            Code::Internal           => 13,
            Code::Unavailable        => 14,
            Code::DataLoss           => 15,
            Code::Unauthenticated    => 16,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How loudly a finished call is reported.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

// ── Status ────────────────────────────────────────────────────────────────────

/// A failed call: one code and a human-readable message.
///
/// This is the only error type a middleware chain ever returns. Successful
/// calls carry no `Status` at all; `Code::Ok` exists for reporting.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn code(&self) -> Code { self.code }
    pub fn message(&self) -> &str { &self.message }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }
}

/// Code of a finished call, `Ok` when it succeeded.
pub(crate) fn code_of<T>(result: &Result<T, Status>) -> Code {
    match result {
        Ok(_)       => Code::Ok,
        Err(status) => status.code(),
    }
}
