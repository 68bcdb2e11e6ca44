//! Built-in health-check handler.
//!
//! Load balancers and orchestrators poll one well-known method to decide
//! whether an instance should receive traffic. The server registers
//! [`check`] at [`HEALTH_CHECK_METHOD`] unless told not to, and the audit
//! unit skips that path by default so polling does not flood the log.
//!
//! Override it with your own handler if readiness depends on downstream
//! services:
//!
//! ```rust
//! use bytes::Bytes;
//! use conduit::{CallScope, Status, health};
//!
//! async fn check(_scope: CallScope, _req: Bytes) -> Result<&'static str, Status> {
//!     if dependencies_are_healthy().await {
//!         Ok(health::SERVING)
//!     } else {
//!         Err(Status::unavailable(health::NOT_SERVING))
//!     }
//! }
//!
//! async fn dependencies_are_healthy() -> bool { true }
//! ```

use bytes::Bytes;

use crate::scope::CallScope;
use crate::status::Status;

/// Full method path of the standard health-check service.
pub const HEALTH_CHECK_METHOD: &str = "/grpc.health.v1.Health/Check";

pub const SERVING: &str = "SERVING";
pub const NOT_SERVING: &str = "NOT_SERVING";

/// Default health handler.
///
/// Always answers `SERVING`. If the server can run a handler at all, it is
/// alive, so this handler has no dependencies.
pub async fn check(_scope: CallScope, _request: Bytes) -> Result<&'static str, Status> {
    Ok(SERVING)
}
