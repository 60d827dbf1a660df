//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: structured tracing, CORS, compression, CSRF
//! protection, security headers.
//!
//! # The onion
//!
//! A chain is an ordered list of [`Middleware`] entries plus exactly one
//! terminal [`Handler`](crate::Handler). Each entry receives the request
//! [`Context`] and a [`Next`] continuation; calling `next.run(ctx)` hands
//! control to the rest of the chain, and whatever runs after that call runs
//! only once the entire downstream — terminal handler included — has
//! completed. Returning a [`Response`] without calling `next` short-circuits
//! the chain (CORS preflight, CSRF rejection).
//!
//! `Next` is consumed by value, so "call the continuation at most once" is
//! enforced by the type system, not by a runtime flag. Order is exactly
//! registration order; there is no priority scheme.
//!
//! ```rust
//! use tsuba::middleware::{Chain, Middleware, Next};
//! use tsuba::{Context, Response};
//!
//! struct RequestId;
//!
//! #[async_trait::async_trait]
//! impl Middleware for RequestId {
//!     async fn handle(&self, mut ctx: Context, next: Next<'_>) -> Response {
//!         ctx.set("request_id", 42u64);
//!         let mut res = next.run(ctx).await;
//!         res.insert_header("x-request-id", "42");
//!         res
//!     }
//!
//!     fn name(&self) -> &'static str { "request_id" }
//! }
//!
//! async fn hello(_ctx: Context) -> Response { Response::text("hi") }
//!
//! let chain = Chain::new(hello).with(RequestId);
//! ```
//!
//! Built-in policies:
//! - [`Trace`] — one structured log event per request: method, path, status, latency
//! - [`Cors`] — preflight handling and allow-origin resolution
//! - [`Compress`] — gzip/deflate negotiation and payload compression
//! - [`Csrf`] — token validation for state-changing methods
//! - [`SecurityHeaders`] — nosniff, frame options, HSTS, CSP
//! - [`Timeout`] — races the downstream chain against a timer

mod compress;
mod cors;
mod csrf;
mod security_headers;
mod timeout;
mod trace;

pub use compress::Compress;
pub use cors::{AllowOrigin, Cors};
pub use csrf::{Csrf, CsrfTokens, CSRF_TOKENS_KEY};
pub use security_headers::{Csp, SecurityHeaders};
pub use timeout::Timeout;
pub use trace::Trace;

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::response::Response;

/// A single middleware entry.
///
/// Implementations may run logic before and/or after delegating downstream,
/// mutate the context data map on the way in, and adjust the response on the
/// way out. Not calling `next.run` short-circuits the chain: downstream
/// entries and the terminal handler never execute.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, ctx: Context, next: Next<'_>) -> Response;

    /// Diagnostic identifier, used in chain-level tracing.
    fn name(&self) -> &'static str {
        "middleware"
    }
}

/// The continuation handed to each middleware entry.
///
/// Consumed by value — an entry can call [`run`](Next::run) once or not at
/// all, never twice.
pub struct Next<'a> {
    pub(crate) rest: &'a [Arc<dyn Middleware>],
    pub(crate) endpoint: &'a BoxedHandler,
}

impl Next<'_> {
    /// Runs the remainder of the chain: the next entry if one exists,
    /// otherwise the terminal handler.
    pub async fn run(mut self, ctx: Context) -> Response {
        if let Some((head, rest)) = self.rest.split_first() {
            self.rest = rest;
            head.handle(ctx, self).await
        } else {
            self.endpoint.call(ctx).await
        }
    }
}

/// An ordered middleware chain with a terminal handler.
///
/// Build once at startup, run per request. The chain holds no cross-request
/// state: [`run`](Chain::run) borrows it immutably, so a single chain serves
/// any number of concurrent requests, each with its own [`Context`].
pub struct Chain {
    entries: Vec<Arc<dyn Middleware>>,
    endpoint: BoxedHandler,
}

impl Chain {
    /// Creates a chain with no entries and `endpoint` as terminal handler.
    pub fn new(endpoint: impl Handler) -> Self {
        Self { entries: Vec::new(), endpoint: endpoint.into_boxed_handler() }
    }

    /// Appends an entry. Entries execute in the order they were appended.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.entries.push(Arc::new(middleware));
        self
    }

    /// Appends an already-shared entry.
    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.entries.push(middleware);
        self
    }

    /// Executes the full chain for one request.
    pub async fn run(&self, ctx: Context) -> Response {
        Next { rest: &self.entries, endpoint: &self.endpoint }.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use http::StatusCode;

    /// Records its label when entered and when the downstream chain returns.
    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Record {
        async fn handle(&self, ctx: Context, next: Next<'_>) -> Response {
            self.log.lock().unwrap().push(format!("{}:in", self.label));
            let res = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("{}:out", self.label));
            res
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    /// Never calls its continuation.
    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, _ctx: Context, _next: Next<'_>) -> Response {
            Response::status(StatusCode::IM_A_TEAPOT)
        }
    }

    fn terminal_log(log: Arc<Mutex<Vec<String>>>) -> impl Handler {
        move |_ctx: Context| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("terminal".to_owned());
                Response::text("done")
            }
        }
    }

    #[tokio::test]
    async fn entries_run_in_order_and_terminal_runs_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(terminal_log(Arc::clone(&log)))
            .with(Record { label: "a", log: Arc::clone(&log) })
            .with(Record { label: "b", log: Arc::clone(&log) })
            .with(Record { label: "c", log: Arc::clone(&log) });

        let res = chain.run(Context::test("GET", "/", &[], b"")).await;
        assert_eq!(res.status_code(), StatusCode::OK);

        let seen = log.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec!["a:in", "b:in", "c:in", "terminal", "c:out", "b:out", "a:out"]
        );
        assert_eq!(seen.iter().filter(|s| *s == "terminal").count(), 1);
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream_and_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(terminal_log(Arc::clone(&log)))
            .with(Record { label: "a", log: Arc::clone(&log) })
            .with(ShortCircuit)
            .with(Record { label: "b", log: Arc::clone(&log) });

        let res = chain.run(Context::test("GET", "/", &[], b"")).await;
        assert_eq!(res.status_code(), StatusCode::IM_A_TEAPOT);

        let seen = log.lock().unwrap().clone();
        // `a` ran both phases, `b` and the terminal never ran.
        assert_eq!(seen, vec!["a:in", "a:out"]);
    }

    #[tokio::test]
    async fn empty_chain_goes_straight_to_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(terminal_log(Arc::clone(&log)));
        chain.run(Context::test("GET", "/", &[], b"")).await;
        assert_eq!(log.lock().unwrap().clone(), vec!["terminal"]);
    }

    #[tokio::test]
    async fn context_data_flows_downstream() {
        struct Seed;

        #[async_trait]
        impl Middleware for Seed {
            async fn handle(&self, mut ctx: Context, next: Next<'_>) -> Response {
                ctx.set("seed", String::from("planted"));
                next.run(ctx).await
            }
        }

        async fn reads_seed(ctx: Context) -> Response {
            match ctx.get::<String>("seed") {
                Some(v) => Response::text(v.clone()),
                None => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
            }
        }

        let chain = Chain::new(reads_seed).with(Seed);
        let res = chain.run(Context::test("GET", "/", &[], b"")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"planted");
    }

    #[tokio::test]
    async fn elapsed_covers_a_delayed_terminal() {
        /// Mirrors what `Trace` measures: elapsed from the context start,
        /// read once the downstream chain has fully completed.
        struct Measure {
            elapsed: Arc<Mutex<Option<Duration>>>,
        }

        #[async_trait]
        impl Middleware for Measure {
            async fn handle(&self, ctx: Context, next: Next<'_>) -> Response {
                let start = ctx.started_at();
                let res = next.run(ctx).await;
                *self.elapsed.lock().unwrap() = Some(start.elapsed());
                res
            }
        }

        async fn slow(_ctx: Context) -> Response {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Response::text("slow")
        }

        let elapsed = Arc::new(Mutex::new(None));
        let chain = Chain::new(slow).with(Measure { elapsed: Arc::clone(&elapsed) });

        let wall_start = Instant::now();
        chain.run(Context::test("GET", "/", &[], b"")).await;
        let wall = wall_start.elapsed();

        let measured = elapsed.lock().unwrap().expect("middleware ran");
        assert!(measured >= Duration::from_millis(50), "measured {measured:?}");
        assert!(measured <= wall, "measured {measured:?} > wall {wall:?}");
    }

    #[tokio::test]
    async fn chain_is_reusable_across_requests() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(terminal_log(Arc::clone(&log)))
            .with(Record { label: "a", log: Arc::clone(&log) });

        chain.run(Context::test("GET", "/", &[], b"")).await;
        chain.run(Context::test("GET", "/", &[], b"")).await;

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen, vec!["a:in", "terminal", "a:out", "a:in", "terminal", "a:out"]);
    }
}
