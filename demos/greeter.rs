//! Greeter service on the in-memory transport, with the default chains.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example greeter
//!
//! Shows one authenticated call, one rejected call and a streaming call,
//! each producing an audit record in the log.

use std::time::Duration;

use bytes::Bytes;
use conduit::middleware::audit::Audit;
use conduit::middleware::auth::{Authenticate, StaticCredentials};
use conduit::middleware::canceled::DetectCancellation;
use conduit::middleware::defaults::Defaults;
use conduit::middleware::hostname::Hostname;
use conduit::middleware::recovery::RecoverPanics;
use conduit::middleware::timeout::DetectTimeout;
use conduit::middleware::{Chain, ServerUnary};
use conduit::testing::Harness;
use conduit::{CallScope, ServerStream, Status};

const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";
const CHAT: &str = "/helloworld.Greeter/Chat";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let defaults = Defaults::new();
    let credentials = StaticCredentials::new().user("alice", "123");

    // hostname sits closest to the handler, auth and the defaults wrap it
    let mut unary = Chain::<ServerUnary>::builder();
    if let Some(hostname) = Hostname::detect() {
        unary = unary.layer(hostname);
    }
    let unary = unary
        .layer(Authenticate::new(credentials.clone()))
        .layer(Audit::default())
        .layer(DetectCancellation::new())
        .layer(DetectTimeout::new())
        .layer(RecoverPanics::new())
        .build()?;

    let mut harness = Harness::builder()
        .server_unary(unary)
        .server_stream(defaults.authenticated_server(credentials)?)
        .client_unary(defaults.client()?)
        .client_stream(defaults.client()?)
        .build();
    harness.register_service(|r| {
        r.unary(SAY_HELLO, say_hello).stream(CHAT, chat);
    })?;
    harness.start()?;

    let client = harness.client();

    let res = client.unary(login(SAY_HELLO, "alice", "123")?, "bob").await?;
    println!(
        "reply: {} (served by {})",
        String::from_utf8_lossy(res.payload()),
        res.metadata().get("hostname").unwrap_or("unknown"),
    );

    match client.unary(login(SAY_HELLO, "alice", "wrong")?, "bob").await {
        Ok(_) => println!("unexpected success"),
        Err(status) => println!("rejected: {status}"),
    }

    let mut stream = client.open(login(CHAT, "alice", "123")?).await?;
    for word in ["one", "two", "three"] {
        stream.send(word).await?;
    }
    stream.close_send();
    while let Some(message) = stream.message().await? {
        println!("chat: {}", String::from_utf8_lossy(&message));
    }

    harness.cleanup().await;
    Ok(())
}

fn login(method: &str, user: &str, pass: &str) -> Result<CallScope, Status> {
    let mut scope = CallScope::new(method).with_timeout(Duration::from_secs(5));
    scope.outbound_mut().insert("user", user)?;
    scope.outbound_mut().insert("pass", pass)?;
    scope.outbound_mut().insert("user-agent", "greeter-demo/0.1")?;
    Ok(scope)
}

async fn say_hello(scope: CallScope, name: Bytes) -> Result<String, Status> {
    let who = scope.identity().map(|i| i.subject()).unwrap_or("anonymous");
    Ok(format!("Hello {} (asked by {who})", String::from_utf8_lossy(&name)))
}

async fn chat(_scope: CallScope, mut stream: ServerStream) -> Result<(), Status> {
    while let Some(message) = stream.message().await {
        let upper = String::from_utf8_lossy(&message).to_uppercase();
        stream.send(upper).await?;
    }
    Ok(())
}
