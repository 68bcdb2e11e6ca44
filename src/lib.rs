//! # conduit
//!
//! Call plumbing for RPC services: ordered middleware chains around unary
//! and streaming calls on both sides, a scope-bounded dialer, and an
//! in-process transport to test it all on.
//!
//! ## The pieces
//!
//! - **Chains.** A [`Chain`](middleware::Chain) wraps every call of one kind
//!   (client or server, unary or streaming) in an ordered list of units:
//!   authentication, auditing, timeout and cancellation logging, panic
//!   recovery, header propagation. Units are plain values and are shared by
//!   every concurrent call.
//! - **Scope.** Each call carries a [`CallScope`]: method, deadline,
//!   cancellation, metadata in both directions and the peer address.
//! - **Dialing.** [`Dialer::establish`](dial::Dialer::establish) connects
//!   (and optionally handshakes) within a scope and reports exactly one
//!   classified outcome.
//! - **Transport.** A [`Transport`](transport::Transport) carries calls to
//!   an [`Acceptor`](transport::Acceptor). The in-memory one backs the
//!   [`Harness`](testing::Harness).
//!
//! Wire framing and code generation are not part of this crate.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use conduit::middleware::auth::StaticCredentials;
//! use conduit::middleware::defaults::Defaults;
//! use conduit::transport::memory;
//! use conduit::{CallScope, Client, Server, Status};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let defaults = Defaults::new();
//!     let server = Server::builder()
//!         .unary_chain(defaults.authenticated_server(StaticCredentials::new().user("alice", "123"))?)
//!         .service(|r| {
//!             r.unary("/helloworld.Greeter/SayHello", say_hello);
//!         })
//!         .build();
//!
//!     let (acceptor, transport) = memory::channel();
//!     tokio::spawn(async move { server.serve(acceptor).await });
//!
//!     let client = Client::new(transport).with_unary_chain(defaults.client()?);
//!     let mut scope = CallScope::new("/helloworld.Greeter/SayHello");
//!     scope.outbound_mut().insert("user", "alice")?;
//!     scope.outbound_mut().insert("pass", "123")?;
//!
//!     let res = client.unary(scope, "bob").await?;
//!     println!("{}", String::from_utf8_lossy(res.payload()));
//!     Ok(())
//! }
//!
//! async fn say_hello(_scope: CallScope, name: Bytes) -> Result<String, Status> {
//!     Ok(format!("hello {}", String::from_utf8_lossy(&name)))
//! }
//! ```

mod client;
mod error;
mod handler;
mod metadata;
mod response;
mod router;
mod scope;
mod server;
mod status;
mod stream;

pub mod dial;
pub mod health;
pub mod middleware;
pub mod testing;
pub mod transport;

pub use client::Client;
pub use error::{DialError, Error};
pub use handler::{StreamHandler, UnaryHandler};
pub use metadata::Metadata;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use scope::{CallScope, Identity, ScopeError};
pub use server::{Server, ServerBuilder};
pub use status::{Code, Severity, Status};
pub use stream::{ClientStream, ServerStream};
