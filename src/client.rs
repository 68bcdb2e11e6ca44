//! Calling side: runs calls through the client chains onto a transport.

use std::sync::Arc;

use bytes::Bytes;

use crate::middleware::{Chain, ClientStreaming, ClientUnary};
use crate::response::Response;
use crate::scope::CallScope;
use crate::status::Status;
use crate::stream::ClientStream;
use crate::transport::{Invoke, Transport};

/// A handle for making calls.
///
/// Cheap to clone; clones share the transport and chains and may be used
/// from many tasks at once.
///
/// ```rust,no_run
/// use conduit::{CallScope, Client};
/// use conduit::transport::memory;
///
/// # async fn run() -> Result<(), conduit::Status> {
/// let (_acceptor, transport) = memory::channel();
/// let client = Client::new(transport);
///
/// let mut scope = CallScope::new("/helloworld.Greeter/SayHello");
/// scope.outbound_mut().insert("user", "alice")?;
/// let res = client.unary(scope, "bob").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    unary: Chain<ClientUnary>,
    stream: Chain<ClientStreaming>,
}

impl Client {
    /// A client with empty chains.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            unary: Chain::empty(),
            stream: Chain::empty(),
        }
    }

    pub fn with_unary_chain(mut self, chain: Chain<ClientUnary>) -> Self {
        self.unary = chain;
        self
    }

    pub fn with_stream_chain(mut self, chain: Chain<ClientStreaming>) -> Self {
        self.stream = chain;
        self
    }

    /// Sends one request and waits for the response.
    ///
    /// Metadata set on the scope's outbound side reaches the server as its
    /// inbound metadata.
    pub async fn unary(&self, scope: CallScope, request: impl Into<Bytes>) -> Result<Response, Status> {
        let invoke = Invoke(&*self.transport);
        self.unary.call(scope, request.into(), &invoke).await
    }

    /// Opens a streaming call.
    pub async fn open(&self, scope: CallScope) -> Result<ClientStream, Status> {
        let invoke = Invoke(&*self.transport);
        self.stream.call(scope, (), &invoke).await
    }
}
