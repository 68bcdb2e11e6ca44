//! Credential checks on the serving side.
//!
//! Credentials travel in inbound metadata, either as a bearer token
//!
//! ```text
//! authorization: Bearer <token>
//! ```
//!
//! or as a `user` / `pass` pair. A bearer token wins when both are present.
//! What counts as valid is up to the [`CredentialVerifier`]; the unit only
//! extracts, delegates and records the verified [`Identity`] on the scope
//! before calling on.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::{Middleware, Next, Outcome, ServerSide};
use crate::metadata::Metadata;
use crate::scope::{CallScope, Identity};
use crate::status::Status;

/// Credentials presented by a caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Credential {
    Bearer(String),
    Basic { user: String, pass: String },
}

impl Credential {
    /// Pulls the credential out of call metadata.
    ///
    /// ```rust
    /// use conduit::Metadata;
    /// use conduit::middleware::auth::Credential;
    ///
    /// let md = Metadata::from_pairs([("authorization", "Bearer abc")]).unwrap();
    /// assert_eq!(Credential::extract(&md).unwrap(), Credential::Bearer("abc".into()));
    /// ```
    pub fn extract(metadata: &Metadata) -> Result<Self, Status> {
        if let Some(value) = metadata.get("authorization") {
            let (scheme, token) = value
                .split_once(' ')
                .ok_or_else(|| Status::unauthenticated("bad authorization string"))?;
            if !scheme.eq_ignore_ascii_case("bearer") {
                return Err(Status::unauthenticated("request unauthenticated with bearer"));
            }
            return Ok(Self::Bearer(token.trim().to_owned()));
        }

        match (metadata.get("user"), metadata.get("pass")) {
            (Some(user), Some(pass)) => Ok(Self::Basic { user: user.to_owned(), pass: pass.to_owned() }),
            _ => Err(Status::unauthenticated("authorization token is not supplied")),
        }
    }
}

/// Decides whether a credential is acceptable.
///
/// Runs inline on every authenticated call, so keep it cheap or cache.
pub trait CredentialVerifier: Send + Sync + 'static {
    fn verify(&self, credential: &Credential) -> Result<Identity, Status>;
}

/// A fixed table of users and tokens.
///
/// ```rust
/// use conduit::middleware::auth::StaticCredentials;
///
/// let verifier = StaticCredentials::new()
///     .user("alice", "123")
///     .token("s3cr3t", "deploy-bot");
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
    tokens: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.users.insert(user.into(), pass.into());
        self
    }

    /// Accepts `token` as a bearer token authenticating `subject`.
    pub fn token(mut self, token: impl Into<String>, subject: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), subject.into());
        self
    }
}

impl CredentialVerifier for StaticCredentials {
    fn verify(&self, credential: &Credential) -> Result<Identity, Status> {
        let subject = match credential {
            Credential::Basic { user, pass } => self
                .users
                .get(user)
                .filter(|expected| *expected == pass)
                .map(|_| user.as_str()),
            Credential::Bearer(token) => self.tokens.get(token).map(String::as_str),
        };
        subject
            .map(Identity::new)
            .ok_or_else(|| Status::unauthenticated("invalid credentials"))
    }
}

/// Rejects calls without acceptable credentials before they reach anything
/// listed earlier in the chain.
pub struct Authenticate<V> {
    verifier: Arc<V>,
}

impl<V: CredentialVerifier> Authenticate<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier: Arc::new(verifier) }
    }
}

impl<V> Clone for Authenticate<V> {
    fn clone(&self) -> Self {
        Self { verifier: Arc::clone(&self.verifier) }
    }
}

impl<K: ServerSide, V: CredentialVerifier> Middleware<K> for Authenticate<V> {
    fn call<'a>(&'a self, mut scope: CallScope, input: K::Input, next: Next<'a, K>) -> BoxFuture<'a, Outcome<K>> {
        Box::pin(async move {
            let identity = {
                let metadata = scope
                    .inbound()
                    .ok_or_else(|| Status::invalid_argument("retrieving metadata failed"))?;
                let credential = Credential::extract(metadata)?;
                self.verifier.verify(&credential)?
            };

            debug!(method = %scope.method(), subject = %identity.subject(), "call authenticated");
            scope.set_identity(identity);
            next.run(scope, input).await
        })
    }

    fn name(&self) -> &'static str {
        "auth"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::middleware::{Chain, ServerUnary, endpoint_fn};
    use crate::response::Response;
    use crate::status::Code;

    fn chain() -> Chain<ServerUnary> {
        Chain::builder()
            .layer(Authenticate::new(StaticCredentials::new().user("alice", "123").token("t0k", "bot")))
            .build()
            .unwrap()
    }

    fn scope(pairs: &[(&str, &str)]) -> CallScope {
        let md = Metadata::from_pairs(pairs.iter().copied()).unwrap();
        CallScope::new("/helloworld.Greeter/SayHello").with_inbound(md)
    }

    #[tokio::test]
    async fn valid_user_reaches_handler_with_identity() {
        let whoami = endpoint_fn::<ServerUnary, _, _>(|scope: CallScope, _: Bytes| async move {
            let subject = scope.identity().map(|i| i.subject().to_owned()).unwrap_or_default();
            Ok(Response::new(subject))
        });

        let res = chain()
            .call(scope(&[("user", "alice"), ("pass", "123")]), Bytes::new(), &whoami)
            .await
            .unwrap();
        assert_eq!(res.payload(), "alice");

        let res = chain()
            .call(scope(&[("authorization", "bearer t0k")]), Bytes::new(), &whoami)
            .await
            .unwrap();
        assert_eq!(res.payload(), "bot");
    }

    #[tokio::test]
    async fn rejected_calls_never_reach_handler() {
        let reached = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&reached);
        let handler = endpoint_fn::<ServerUnary, _, _>(move |_: CallScope, _: Bytes| {
            flag.store(true, Ordering::SeqCst);
            async { Ok(Response::default()) }
        });

        let cases: [(CallScope, Code); 5] = [
            (scope(&[("user", "alice"), ("pass", "wrong")]), Code::Unauthenticated),
            (scope(&[("user", "alice")]), Code::Unauthenticated),
            (scope(&[("authorization", "Basic YWxpY2U6MTIz")]), Code::Unauthenticated),
            (scope(&[("authorization", "garbage")]), Code::Unauthenticated),
            (CallScope::new("/helloworld.Greeter/SayHello"), Code::InvalidArgument),
        ];
        for (scope, code) in cases {
            let err = chain().call(scope, Bytes::new(), &handler).await.unwrap_err();
            assert_eq!(err.code(), code, "{err}");
        }
        assert!(!reached.load(Ordering::SeqCst));
    }

    #[test]
    fn bearer_wins_over_user_and_pass() {
        let md = Metadata::from_pairs([("user", "alice"), ("pass", "123"), ("authorization", "Bearer x")]).unwrap();
        assert_eq!(Credential::extract(&md).unwrap(), Credential::Bearer("x".to_owned()));
    }
}
