//! Deadline middleware.
//!
//! The pipeline itself enforces no timeouts; this entry adds one by racing
//! its continuation against a timer. When the deadline passes, the client
//! gets `504 Gateway Timeout` and the downstream future is dropped at its
//! next suspension point.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Races the rest of the chain against a deadline.
///
/// ```rust
/// use std::time::Duration;
/// use tsuba::Router;
/// use tsuba::middleware::Timeout;
///
/// let app = Router::new().with(Timeout::after(Duration::from_secs(30)));
/// ```
pub struct Timeout {
    limit: Duration,
}

impl Timeout {
    pub fn after(limit: Duration) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl Middleware for Timeout {
    async fn handle(&self, ctx: Context, next: Next<'_>) -> Response {
        let method = ctx.method().clone();
        let path = ctx.path().to_owned();

        match tokio::time::timeout(self.limit, next.run(ctx)).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(%method, path, limit_ms = self.limit.as_millis() as u64, "request timed out");
                Response::status(StatusCode::GATEWAY_TIMEOUT)
            }
        }
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}
