//! Stamps the serving host on every unary response.
//!
//! Behind a load balancer it is often unclear which replica answered. This
//! unit adds a `hostname` header to every successful unary response.

use std::env;
use std::fs;

use futures::future::BoxFuture;

use super::{Middleware, Next, Outcome, ServerUnary};
use crate::metadata::Metadata;
use crate::scope::CallScope;
use crate::status::Status;

/// Response header the host name is written to.
pub const HOSTNAME_HEADER: &str = "hostname";

#[derive(Clone, Debug)]
pub struct Hostname {
    // validated as a metadata value
    name: String,
}

impl Hostname {
    /// Stamps `name`. Fails if it is not a valid metadata value.
    pub fn new(name: &str) -> Result<Self, Status> {
        Metadata::new().insert(HOSTNAME_HEADER, name)?;
        Ok(Self { name: name.to_owned() })
    }

    /// Stamps the name of the machine this process runs on.
    ///
    /// Tries `$HOSTNAME`, then the kernel's host name. `None` if neither is
    /// available or valid.
    pub fn detect() -> Option<Self> {
        let from_env = env::var("HOSTNAME").ok();
        let from_kernel = || {
            ["/proc/sys/kernel/hostname", "/etc/hostname"]
                .iter()
                .find_map(|path| fs::read_to_string(path).ok())
        };

        from_env
            .or_else(from_kernel)
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .and_then(|name| Self::new(&name).ok())
    }

    pub fn value(&self) -> &str {
        &self.name
    }
}

impl Middleware<ServerUnary> for Hostname {
    fn call<'a>(
        &'a self,
        scope: CallScope,
        input: bytes::Bytes,
        next: Next<'a, ServerUnary>,
    ) -> BoxFuture<'a, Outcome<ServerUnary>> {
        Box::pin(async move {
            let mut res = next.run(scope, input).await?;
            // single-valued: replaces whatever the handler set
            res.metadata_mut().insert(HOSTNAME_HEADER, &self.name)?;
            Ok(res)
        })
    }

    fn name(&self) -> &'static str {
        "hostname"
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::middleware::{Chain, endpoint_fn};
    use crate::response::Response;
    use crate::status::Code;

    #[tokio::test]
    async fn stamps_successful_responses_only() {
        let chain = Chain::<ServerUnary>::builder()
            .layer(Hostname::new("node-7").unwrap())
            .build()
            .unwrap();

        let ok = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, _: Bytes| async { Ok(Response::new("hi")) });
        let res = chain.call(CallScope::new("/s.S/M"), Bytes::new(), &ok).await.unwrap();
        assert_eq!(res.metadata().get(HOSTNAME_HEADER), Some("node-7"));

        let fail = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, _: Bytes| async {
            Err::<Response, _>(Status::not_found("gone"))
        });
        let err = chain.call(CallScope::new("/s.S/M"), Bytes::new(), &fail).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn replaces_a_hostname_set_by_the_handler() {
        let chain = Chain::<ServerUnary>::builder()
            .layer(Hostname::new("node-7").unwrap())
            .build()
            .unwrap();

        let stamped = endpoint_fn::<ServerUnary, _, _>(|_: CallScope, _: Bytes| async {
            Response::builder().header(HOSTNAME_HEADER, "stale").payload("hi")
        });
        let res = chain.call(CallScope::new("/s.S/M"), Bytes::new(), &stamped).await.unwrap();
        assert_eq!(res.metadata().get_all(HOSTNAME_HEADER), ["node-7"]);
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(Hostname::new("bad\nname").is_err());
    }
}
