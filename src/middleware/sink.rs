//! Where middleware units report what they observed.
//!
//! Units never log directly. They build a [`CallEvent`] and hand it to the
//! [`EventSink`] injected at construction. [`TracingSink`] turns events into
//! structured `tracing` records; tests swap in
//! [`MemorySink`](crate::testing::MemorySink) and assert on the events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::status::{Code, Severity, Status};

/// One audited call.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditEntry {
    pub method: String,
    pub peer: SocketAddr,
    /// Every `user-agent` value the caller sent.
    pub user_agent: Vec<String>,
    pub duration: Duration,
    pub code: Code,
    /// The error message, `None` on success.
    pub message: Option<String>,
}

impl AuditEntry {
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Ok
    }
}

/// Something a unit observed about a call.
#[derive(Clone, Debug, PartialEq)]
pub enum CallEvent {
    Audit(AuditEntry),
    /// The call ended with `DeadlineExceeded`.
    Timeout { method: String, duration: Duration, status: Status },
    /// The caller canceled the call while it was running.
    Canceled { method: String, duration: Duration, code: Code },
    /// A unit or handler panicked and the panic was turned into `Internal`.
    Panic { method: String, message: String },
}

/// Receives events from middleware units.
///
/// Called inline on the call path, once per event, from many calls at once.
pub trait EventSink: Send + Sync + 'static {
    fn record(&self, event: &CallEvent);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Default sink: one structured `tracing` record per event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &CallEvent) {
        match event {
            CallEvent::Audit(entry) => audit(entry),
            CallEvent::Timeout { method, duration, status } => {
                warn!(method = %method, ?duration, code = %status.code(), "call timed out: {}", status.message());
            }
            CallEvent::Canceled { method, duration, code } => {
                info!(method = %method, ?duration, code = %code, "call canceled by caller");
            }
            CallEvent::Panic { method, message } => {
                error!(method = %method, "recovered from panic: {message}");
            }
        }
    }
}

fn audit(entry: &AuditEntry) {
    let user_agent = entry.user_agent.join(", ");
    let message = entry.message.as_deref().unwrap_or("");
    match entry.severity() {
        Severity::Info => info!(
            method = %entry.method, peer = %entry.peer, user_agent = %user_agent,
            duration = ?entry.duration, code = %entry.code, "call finished",
        ),
        Severity::Warning => warn!(
            method = %entry.method, peer = %entry.peer, user_agent = %user_agent,
            duration = ?entry.duration, code = %entry.code, "call failed: {message}",
        ),
        Severity::Error => error!(
            method = %entry.method, peer = %entry.peer, user_agent = %user_agent,
            duration = ?entry.duration, code = %entry.code, "call failed: {message}",
        ),
    }
}

pub(crate) fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}
