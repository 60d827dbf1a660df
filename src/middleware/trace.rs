//! Per-request structured logging.
//!
//! Emits exactly one `tracing` event per request — method, path, status, and
//! latency — once the downstream chain has completed. Register it first so
//! the reported latency covers every other entry.

use async_trait::async_trait;

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Request logging middleware.
///
/// ```rust
/// use tsuba::Router;
/// use tsuba::middleware::Trace;
///
/// let app = Router::new().with(Trace::new());
/// ```
pub struct Trace {
    _private: (),
}

impl Trace {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for Trace {
    async fn handle(&self, ctx: Context, next: Next<'_>) -> Response {
        // The context moves downstream, so capture what the log line needs
        // up front. Latency is measured from pipeline entry, not from here.
        let method = ctx.method().clone();
        let path = ctx.path().to_owned();
        let start = ctx.started_at();

        let res = next.run(ctx).await;

        tracing::info!(
            method = %method,
            path = %path,
            status = res.status_code().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "request"
        );
        res
    }

    fn name(&self) -> &'static str {
        "trace"
    }
}
