//! Logs calls the caller canceled while they were running.

use futures::future::BoxFuture;
use tokio::time::Instant;

use super::sink::{CallEvent, SharedSink, default_sink};
use super::{CallKind, Middleware, Next, Outcome};
use crate::scope::CallScope;
use crate::status::code_of;

/// Reports calls whose scope was canceled by the time the call returned.
///
/// Looks at the scope, not the returned status: a handler that swallowed the
/// cancellation and answered anyway is still reported. An expired deadline
/// is not a cancellation; [`DetectTimeout`](super::timeout::DetectTimeout)
/// covers that.
#[derive(Clone)]
pub struct DetectCancellation {
    sink: SharedSink,
}

impl DetectCancellation {
    pub fn new() -> Self {
        Self { sink: default_sink() }
    }

    pub fn with_sink(sink: SharedSink) -> Self {
        Self { sink }
    }
}

impl Default for DetectCancellation {
    fn default() -> Self { Self::new() }
}

impl<K: CallKind> Middleware<K> for DetectCancellation {
    fn call<'a>(&'a self, scope: CallScope, input: K::Input, next: Next<'a, K>) -> BoxFuture<'a, Outcome<K>> {
        Box::pin(async move {
            let method = scope.method().to_owned();
            let token = scope.token().clone();
            let start = Instant::now();
            let result = next.run(scope, input).await;

            if token.is_cancelled() {
                self.sink.record(&CallEvent::Canceled {
                    method,
                    duration: start.elapsed(),
                    code: code_of(&result),
                });
            }
            result
        })
    }

    fn name(&self) -> &'static str {
        "canceled"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::middleware::{Chain, ServerUnary, endpoint_fn};
    use crate::response::Response;
    use crate::status::{Code, Status};
    use crate::testing::MemorySink;

    #[tokio::test]
    async fn records_when_scope_was_canceled() {
        let sink = MemorySink::new();
        let chain = Chain::<ServerUnary>::builder()
            .layer(DetectCancellation::with_sink(Arc::new(sink.clone())))
            .build()
            .unwrap();

        let wait = endpoint_fn::<ServerUnary, _, _>(|scope: CallScope, _: Bytes| async move {
            Err::<Response, Status>(scope.done().await.into())
        });

        let scope = CallScope::new("/s.S/Wait");
        let canceler = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceler.cancel();
        });

        let err = chain.call(scope, Bytes::new(), &wait).await.unwrap_err();
        assert_eq!(err.code(), Code::Canceled);
        assert!(matches!(
            sink.events().as_slice(),
            [CallEvent::Canceled { code: Code::Canceled, .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_not_a_cancellation() {
        let sink = MemorySink::new();
        let chain = Chain::<ServerUnary>::builder()
            .layer(DetectCancellation::with_sink(Arc::new(sink.clone())))
            .build()
            .unwrap();

        let wait = endpoint_fn::<ServerUnary, _, _>(|scope: CallScope, _: Bytes| async move {
            Err::<Response, Status>(scope.done().await.into())
        });
        let scope = CallScope::new("/s.S/Wait").with_timeout(Duration::from_secs(1));

        let err = chain.call(scope, Bytes::new(), &wait).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert!(sink.events().is_empty());
    }
}
