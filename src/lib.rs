//! # tsuba
//!
//! A minimal HTTP framework built around an onion-style middleware pipeline.
//! Nothing more. Nothing less.
//!
//! ## The contract
//!
//! nginx handles TLS, rate limiting, slow clients, and body-size limits.
//! tsuba does not — by design. The proxy does proxy things. The framework
//! does framework things:
//!
//! - Radix-tree routing — O(path-length) lookup via [`matchit`]
//! - An ordered middleware chain with short-circuit semantics — the
//!   [`middleware`] module
//! - Built-in policies: request tracing, CORS, compression, CSRF protection,
//!   security headers, deadlines
//! - Async I/O via hyper and tokio, graceful shutdown draining in-flight
//!   requests
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tsuba::middleware::{Compress, Csrf, SecurityHeaders, Trace};
//! use tsuba::{Context, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .with(Trace::new())
//!         .with(SecurityHeaders::new())
//!         .with(Compress::new())
//!         .with(Csrf::new())
//!         .get("/users/{id}", get_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(ctx: Context) -> Response {
//!     let id = ctx.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//! ```
//!
//! ## How the chain runs
//!
//! Each middleware receives the request [`Context`] and a
//! [`Next`](middleware::Next) continuation. Code before `next.run(ctx)` runs
//! on the way in, code after it runs once the entire downstream chain —
//! terminal handler included — has completed. Skipping the call
//! short-circuits: downstream entries and the handler never execute. Order
//! is exactly registration order.

mod context;
mod error;
mod handler;
mod response;
mod router;
mod server;

pub mod health;
pub mod middleware;

pub use context::Context;
pub use error::Error;
pub use handler::Handler;
pub use response::{ContentType, IntoResponse, Response};
pub use router::Router;
pub use server::Server;
