//! Logs calls that ended with `DeadlineExceeded`.

use futures::future::BoxFuture;
use tokio::time::Instant;

use super::sink::{CallEvent, SharedSink, default_sink};
use super::{CallKind, Middleware, Next, Outcome};
use crate::scope::CallScope;
use crate::status::Code;

/// Reports calls whose result is `DeadlineExceeded`, on either side.
///
/// Never changes the result. Works for all four call kinds.
#[derive(Clone)]
pub struct DetectTimeout {
    sink: SharedSink,
}

impl DetectTimeout {
    pub fn new() -> Self {
        Self { sink: default_sink() }
    }

    pub fn with_sink(sink: SharedSink) -> Self {
        Self { sink }
    }
}

impl Default for DetectTimeout {
    fn default() -> Self { Self::new() }
}

impl<K: CallKind> Middleware<K> for DetectTimeout {
    fn call<'a>(&'a self, scope: CallScope, input: K::Input, next: Next<'a, K>) -> BoxFuture<'a, Outcome<K>> {
        Box::pin(async move {
            let method = scope.method().to_owned();
            let start = Instant::now();
            let result = next.run(scope, input).await;

            if let Err(status) = &result {
                if status.code() == Code::DeadlineExceeded {
                    self.sink.record(&CallEvent::Timeout {
                        method,
                        duration: start.elapsed(),
                        status: status.clone(),
                    });
                }
            }
            result
        })
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}
