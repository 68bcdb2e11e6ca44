//! End-to-end calls through the in-memory harness with real chains on both sides.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use conduit::health::HEALTH_CHECK_METHOD;
use conduit::middleware::auth::StaticCredentials;
use conduit::middleware::defaults::Defaults;
use conduit::middleware::propagate::PropagateHeaders;
use conduit::middleware::sink::CallEvent;
use conduit::middleware::{Chain, ClientUnary};
use conduit::testing::{Harness, MemorySink};
use conduit::{CallScope, Code, ServerStream, Severity, Status};

const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn credentials() -> StaticCredentials {
    StaticCredentials::new().user("alice", "123")
}

fn login(method: &str, user: &str, pass: &str) -> CallScope {
    let mut scope = CallScope::new(method);
    scope.outbound_mut().insert("user", user).unwrap();
    scope.outbound_mut().insert("pass", pass).unwrap();
    scope.outbound_mut().insert("user-agent", "harness-test/1.0").unwrap();
    scope
}

async fn say_hello(scope: CallScope, name: Bytes) -> Result<String, Status> {
    let who = scope.identity().map(|i| i.subject().to_owned()).unwrap_or_default();
    Ok(format!("Hello {} from {who}", String::from_utf8_lossy(&name)))
}

/// A started harness with the authenticated default server chains.
fn greeter(sink: &MemorySink) -> Harness {
    let defaults = Defaults::new().with_sink(Arc::new(sink.clone()));
    let mut harness = Harness::builder()
        .server_unary(defaults.authenticated_server(credentials()).unwrap())
        .server_stream(defaults.authenticated_server(credentials()).unwrap())
        .build();
    harness
        .register_service(|r| {
            r.unary(SAY_HELLO, say_hello);
        })
        .unwrap();
    harness.start().unwrap();
    harness
}

#[tokio::test]
async fn valid_credentials_succeed_and_are_audited_once() {
    init_tracing();
    let sink = MemorySink::new();
    let mut harness = greeter(&sink);

    let res = harness.client().unary(login(SAY_HELLO, "alice", "123"), "bob").await.unwrap();
    assert_eq!(res.payload(), "Hello bob from alice");

    harness.cleanup().await;

    let audits = sink.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].method, SAY_HELLO);
    assert_eq!(audits[0].code, Code::Ok);
    assert_eq!(audits[0].user_agent, ["harness-test/1.0"]);
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test]
async fn wrong_password_is_rejected_and_audited() {
    init_tracing();
    let sink = MemorySink::new();
    let reached = Arc::new(AtomicUsize::new(0));

    let defaults = Defaults::new().with_sink(Arc::new(sink.clone()));
    let mut harness = Harness::builder()
        .server_unary(defaults.authenticated_server(credentials()).unwrap())
        .build();
    let counter = Arc::clone(&reached);
    harness
        .register_service(move |r| {
            r.unary(SAY_HELLO, move |_: CallScope, _: Bytes| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Status>("should not happen") }
            });
        })
        .unwrap();
    harness.start().unwrap();

    let err = harness.client().unary(login(SAY_HELLO, "alice", "wrong"), "bob").await.unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    harness.cleanup().await;

    assert_eq!(reached.load(Ordering::SeqCst), 0);
    let audits = sink.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].code, Code::Unauthenticated);
    assert_eq!(audits[0].severity(), Severity::Warning);
    assert!(!audits[0].is_success());
}

#[tokio::test]
async fn health_checks_are_not_audited() {
    let sink = MemorySink::new();
    let defaults = Defaults::new().with_sink(Arc::new(sink.clone()));
    let mut harness = Harness::builder().server_unary(defaults.server().unwrap()).build();
    harness.start().unwrap();

    let client = harness.client();
    for _ in 0..3 {
        let res = client.unary(CallScope::new(HEALTH_CHECK_METHOD), Bytes::new()).await.unwrap();
        assert_eq!(res.payload(), conduit::health::SERVING);
    }
    let err = client.unary(CallScope::new("/nope.Nope/Nope"), Bytes::new()).await.unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);

    harness.cleanup().await;

    let audits = sink.audits();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].code, Code::Unimplemented);
}

#[tokio::test]
async fn panicking_handler_returns_internal() {
    let sink = MemorySink::new();
    let defaults = Defaults::new().with_sink(Arc::new(sink.clone()));
    let mut harness = Harness::builder()
        .server_unary(defaults.authenticated_server(credentials()).unwrap())
        .build();
    harness
        .register_service(|r| {
            r.unary(SAY_HELLO, say_hello).unary("/boom.Boom/Now", |_: CallScope, req: Bytes| async move {
                if req.is_empty() {
                    panic!("kaboom");
                }
                Ok::<_, Status>(req)
            });
        })
        .unwrap();
    harness.start().unwrap();
    let client = harness.client();

    let err = client.unary(login("/boom.Boom/Now", "alice", "123"), Bytes::new()).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(err.message(), "something went wrong");

    // the server keeps serving
    let res = client.unary(login(SAY_HELLO, "alice", "123"), "eve").await.unwrap();
    assert_eq!(res.payload(), "Hello eve from alice");

    harness.cleanup().await;

    let panics: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, CallEvent::Panic { .. }))
        .collect();
    assert_eq!(
        panics,
        [CallEvent::Panic { method: "/boom.Boom/Now".to_owned(), message: "kaboom".to_owned() }],
    );
    assert_eq!(sink.audits().len(), 2);
}

#[tokio::test]
async fn headers_follow_downstream_calls() {
    init_tracing();

    // backend echoes the trace id it received
    let mut backend = Harness::builder().build();
    backend
        .register_service(|r| {
            r.unary("/back.Back/Trace", |scope: CallScope, _: Bytes| async move {
                let inbound = scope.inbound().cloned().unwrap_or_default();
                Ok::<_, Status>(format!(
                    "traceid={} user={}",
                    inbound.get("traceid").unwrap_or("-"),
                    inbound.get("user").unwrap_or("-"),
                ))
            });
        })
        .unwrap();
    backend.start().unwrap();

    let propagating = Chain::<ClientUnary>::builder()
        .layer(PropagateHeaders::only(["TraceId"]))
        .build()
        .unwrap();
    let downstream = backend.client().with_unary_chain(propagating);

    let mut frontend = Harness::builder().build();
    frontend
        .register_service(move |r| {
            r.unary("/front.Front/Get", move |scope: CallScope, req: Bytes| {
                let downstream = downstream.clone();
                async move {
                    let next = scope.downstream("/back.Back/Trace");
                    downstream.unary(next, req).await
                }
            });
        })
        .unwrap();
    frontend.start().unwrap();

    let mut scope = CallScope::new("/front.Front/Get");
    scope.outbound_mut().insert("traceid", "abc-123").unwrap();
    scope.outbound_mut().insert("user", "alice").unwrap();

    let res = frontend.client().unary(scope, Bytes::new()).await.unwrap();
    assert_eq!(res.payload(), "traceid=abc-123 user=-");

    frontend.cleanup().await;
    backend.cleanup().await;
}

#[tokio::test(start_paused = true)]
async fn client_deadline_is_reported_on_both_sides() {
    let client_sink = MemorySink::new();
    let server_sink = MemorySink::new();

    let mut harness = Harness::builder()
        .server_unary(Defaults::new().with_sink(Arc::new(server_sink.clone())).server().unwrap())
        .client_unary(Defaults::new().with_sink(Arc::new(client_sink.clone())).client().unwrap())
        .build();
    harness
        .register_service(|r| {
            r.unary("/slow.Slow/Wait", |scope: CallScope, _: Bytes| async move {
                Err::<Bytes, Status>(scope.done().await.into())
            });
        })
        .unwrap();
    harness.start().unwrap();

    let scope = CallScope::new("/slow.Slow/Wait").with_timeout(Duration::from_millis(200));
    let err = harness.client().unary(scope, Bytes::new()).await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    harness.cleanup().await;

    assert!(matches!(client_sink.events().as_slice(), [CallEvent::Timeout { .. }]));
    let server_events = server_sink.events();
    assert!(server_events.iter().any(|e| matches!(e, CallEvent::Timeout { .. })));
    assert!(!server_events.iter().any(|e| matches!(e, CallEvent::Canceled { .. })));
}

#[tokio::test]
async fn client_cancellation_is_detected_by_server() {
    let sink = MemorySink::new();
    let mut harness = Harness::builder()
        .server_unary(Defaults::new().with_sink(Arc::new(sink.clone())).server().unwrap())
        .build();
    harness
        .register_service(|r| {
            r.unary("/slow.Slow/Wait", |scope: CallScope, _: Bytes| async move {
                Err::<Bytes, Status>(scope.done().await.into())
            });
        })
        .unwrap();
    harness.start().unwrap();

    let scope = CallScope::new("/slow.Slow/Wait");
    let canceler = scope.clone();
    let client = harness.client();
    let call = tokio::spawn(async move { client.unary(scope, Bytes::new()).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    canceler.cancel();
    assert_eq!(call.await.unwrap().unwrap_err().code(), Code::Canceled);

    // cleanup drains the server side of the call
    harness.cleanup().await;
    assert!(sink.events().iter().any(|e| matches!(e, CallEvent::Canceled { code: Code::Canceled, .. })));
}

#[tokio::test]
async fn streams_pass_through_server_chain() {
    init_tracing();
    let sink = MemorySink::new();
    let defaults = Defaults::new().with_sink(Arc::new(sink.clone()));
    let mut harness = Harness::builder()
        .server_stream(defaults.authenticated_server(credentials()).unwrap())
        .client_stream(defaults.client().unwrap())
        .build();
    harness
        .register_service(|r| {
            r.stream("/echo.Echo/Chat", |_: CallScope, mut stream: ServerStream| async move {
                let mut count = 0;
                while let Some(message) = stream.message().await {
                    count += 1;
                    stream.send(message).await?;
                }
                stream.send(format!("{count} messages")).await
            });
        })
        .unwrap();
    harness.start().unwrap();
    let client = harness.client();

    let mut stream = client.open(login("/echo.Echo/Chat", "alice", "123")).await.unwrap();
    stream.send("a").await.unwrap();
    stream.send("b").await.unwrap();
    stream.close_send();

    let mut replies = Vec::new();
    while let Some(message) = stream.message().await.unwrap() {
        replies.push(String::from_utf8_lossy(&message).into_owned());
    }
    assert_eq!(replies, ["a", "b", "2 messages"]);

    let mut rejected = client.open(login("/echo.Echo/Chat", "alice", "nope")).await.unwrap();
    assert_eq!(rejected.message().await.unwrap_err().code(), Code::Unauthenticated);

    harness.cleanup().await;

    let codes: Vec<Code> = sink.audits().iter().map(|a| a.code).collect();
    assert_eq!(codes.len(), 2);
    assert!(codes.contains(&Code::Ok));
    assert!(codes.contains(&Code::Unauthenticated));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_chain() {
    let sink = MemorySink::new();
    let mut harness = greeter(&sink);
    let client = harness.client();

    let calls: Vec<_> = (0..50)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let res = client.unary(login(SAY_HELLO, "alice", "123"), format!("n{i}")).await?;
                Ok::<_, Status>(res.into_payload())
            })
        })
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let payload = call.await.unwrap().unwrap();
        assert_eq!(payload, format!("Hello n{i} from alice"));
    }

    harness.cleanup().await;
    assert_eq!(sink.audits().len(), 50);
}

#[tokio::test]
async fn calls_after_cleanup_are_unavailable() {
    let sink = MemorySink::new();
    let mut harness = greeter(&sink);
    let client = harness.client();

    client.unary(login(SAY_HELLO, "alice", "123"), "bob").await.unwrap();
    harness.cleanup().await;
    harness.cleanup().await;

    let err = client.unary(login(SAY_HELLO, "alice", "123"), "bob").await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert!(harness.register_service(|_| {}).is_err());
}

#[tokio::test]
async fn non_ascii_credentials_authenticate() {
    let sink = MemorySink::new();
    let defaults = Defaults::new().with_sink(Arc::new(sink.clone()));
    let mut harness = Harness::builder()
        .server_unary(defaults.authenticated_server(StaticCredentials::new().user("José", "123")).unwrap())
        .build();
    harness
        .register_service(|r| {
            r.unary(SAY_HELLO, say_hello);
        })
        .unwrap();
    harness.start().unwrap();

    let res = harness.client().unary(login(SAY_HELLO, "José", "123"), "bob").await.unwrap();
    assert_eq!(res.payload(), "Hello bob from José");

    harness.cleanup().await;
}
