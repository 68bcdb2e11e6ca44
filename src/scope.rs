//! Per-call scope: cancellation, deadline, metadata and peer.
//!
//! A [`CallScope`] is created for every call and handed by value down the
//! middleware chain. Units read it, may add to it (outbound metadata, a
//! verified identity) and pass it on; nothing keeps it once the call ends.
//!
//! Cancellation is cooperative. The chain never interrupts a handler; a
//! handler that wants to stop early awaits [`CallScope::done`] alongside its
//! own work.

use std::future::pending;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::metadata::Metadata;
use crate::status::Status;

/// Why a scope is finished.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum ScopeError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl From<ScopeError> for Status {
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::Canceled         => Status::canceled(e.to_string()),
            ScopeError::DeadlineExceeded => Status::deadline_exceeded(e.to_string()),
        }
    }
}

/// The principal a call was authenticated as.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Identity {
    subject: String,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self { subject: subject.into() }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Everything a call knows about itself besides its payload.
#[derive(Clone, Debug)]
pub struct CallScope {
    method: String,
    token: CancellationToken,
    deadline: Option<Instant>,
    inbound: Option<Metadata>,
    outbound: Metadata,
    peer: Option<SocketAddr>,
    identity: Option<Identity>,
    idempotency_key: Option<String>,
}

impl CallScope {
    /// A fresh scope for `method` (a full path such as `/helloworld.Greeter/SayHello`)
    /// with no deadline, no metadata and no peer.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            token: CancellationToken::new(),
            deadline: None,
            inbound: None,
            outbound: Metadata::new(),
            peer: None,
            identity: None,
            idempotency_key: None,
        }
    }

    /// Tightens the deadline to `timeout` from now. An earlier deadline wins.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tightens the deadline to `deadline`. An earlier deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_inbound(mut self, metadata: Metadata) -> Self {
        self.inbound = Some(metadata);
        self
    }

    pub fn with_outbound(mut self, metadata: Metadata) -> Self {
        self.outbound = metadata;
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Replaces the cancellation token, e.g. with one handed over by a transport.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Marks the call as safe to retry: repeats carrying the same `key` must
    /// take effect at most once.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// A scope for a call made *from* this one.
    ///
    /// The child is canceled when this scope is, inherits its deadline and
    /// idempotency key, and sees this call's inbound metadata, so header
    /// propagation can forward it. Outbound metadata, peer and identity
    /// start empty.
    pub fn downstream(&self, method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            token: self.token.child_token(),
            deadline: self.deadline,
            inbound: self.inbound.clone(),
            outbound: Metadata::new(),
            peer: None,
            identity: None,
            idempotency_key: self.idempotency_key.clone(),
        }
    }

    /// Same call, separately cancellable: canceling the child leaves `self` alive.
    pub fn child(&self) -> Self {
        let mut child = self.clone();
        child.token = self.token.child_token();
        child
    }

    pub fn method(&self) -> &str { &self.method }
    pub fn deadline(&self) -> Option<Instant> { self.deadline }
    pub fn inbound(&self) -> Option<&Metadata> { self.inbound.as_ref() }
    pub fn outbound(&self) -> &Metadata { &self.outbound }
    pub fn outbound_mut(&mut self) -> &mut Metadata { &mut self.outbound }
    pub fn peer(&self) -> Option<SocketAddr> { self.peer }
    pub fn identity(&self) -> Option<&Identity> { self.identity.as_ref() }
    pub fn idempotency_key(&self) -> Option<&str> { self.idempotency_key.as_deref() }

    pub fn is_idempotent(&self) -> bool {
        self.idempotency_key.is_some()
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Copies inbound pairs whose key passes `keep` into the outbound metadata.
    pub(crate) fn forward_inbound(&mut self, keep: impl FnMut(&str) -> bool) {
        if let Some(inbound) = &self.inbound {
            self.outbound.copy_from(inbound, keep);
        }
    }

    /// Time left before the deadline, `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancels this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Why the scope is finished, or `None` while it is still live.
    ///
    /// Explicit cancellation is reported ahead of an expired deadline.
    pub fn err(&self) -> Option<ScopeError> {
        if self.token.is_cancelled() {
            return Some(ScopeError::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ScopeError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the scope is canceled or its deadline passes.
    pub async fn done(&self) -> ScopeError {
        // a deadline of exactly now has not ticked yet but is already past
        if let Some(err) = self.err() {
            return err;
        }

        let deadline = async {
            match self.deadline {
                Some(d) => sleep_until(d).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => ScopeError::Canceled,
            () = deadline => ScopeError::DeadlineExceeded,
        }
    }
}
