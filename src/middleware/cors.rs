//! CORS (Cross-Origin Resource Sharing) middleware.
//!
//! Preflight `OPTIONS` requests are answered directly with `204 No Content`
//! and never reach the rest of the chain. For all other methods the
//! allow-origin value is resolved first — static value, allow-list lookup
//! against the request `Origin`, or an async resolver — and stamped on the
//! response once the downstream chain returns.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// How the `Access-Control-Allow-Origin` value is chosen.
pub enum AllowOrigin {
    /// `*` — any origin, incompatible with credentials.
    Any,
    /// A single fixed origin.
    Exact(String),
    /// Echo the request origin when it appears in the list; otherwise no
    /// CORS headers are emitted and the browser blocks the response.
    List(Vec<String>),
    /// Async callback receiving the request origin. Returning `None` blocks.
    Resolver(Arc<dyn Fn(&str) -> BoxFuture<'static, Option<String>> + Send + Sync>),
}

/// CORS middleware.
///
/// ```rust
/// use tsuba::middleware::Cors;
///
/// let cors = Cors::new()
///     .allow_origins(vec!["https://app.example.com".into()])
///     .allow_credentials(true)
///     .max_age(3600);
/// ```
pub struct Cors {
    allow_origin: AllowOrigin,
    allow_methods: Vec<String>,
    allow_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<u32>,
}

impl Cors {
    pub fn new() -> Self {
        Self {
            allow_origin: AllowOrigin::Any,
            allow_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .map(str::to_owned)
                .to_vec(),
            allow_headers: ["Content-Type", "Authorization", "X-Requested-With"]
                .map(str::to_owned)
                .to_vec(),
            allow_credentials: false,
            max_age: Some(86_400),
        }
    }

    /// Sets a single allowed origin. `"*"` selects [`AllowOrigin::Any`].
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        self.allow_origin =
            if origin == "*" { AllowOrigin::Any } else { AllowOrigin::Exact(origin) };
        self
    }

    /// Allows any origin from the list; the request origin is echoed back.
    pub fn allow_origins(mut self, origins: Vec<String>) -> Self {
        self.allow_origin = AllowOrigin::List(origins);
        self
    }

    /// Resolves the allow-origin value through an async callback.
    pub fn allow_origin_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> BoxFuture<'static, Option<String>> + Send + Sync + 'static,
    {
        self.allow_origin = AllowOrigin::Resolver(Arc::new(f));
        self
    }

    pub fn allow_methods(mut self, methods: &[&str]) -> Self {
        self.allow_methods = methods.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn allow_headers(mut self, headers: &[&str]) -> Self {
        self.allow_headers = headers.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    /// Enables `Access-Control-Allow-Credentials`.
    ///
    /// The Fetch spec forbids credentials with a wildcard origin. Rather than
    /// erroring, the combination degrades to an empty allow-list (blocking
    /// all cross-origin requests) with a warning.
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        if allow && matches!(self.allow_origin, AllowOrigin::Any) {
            tracing::warn!(
                "Access-Control-Allow-Credentials cannot be combined with a \
                 wildcard origin; specify explicit origins. Blocking all origins."
            );
            self.allow_origin = AllowOrigin::List(Vec::new());
        }
        self
    }

    /// Preflight cache lifetime, in seconds.
    pub fn max_age(mut self, secs: u32) -> Self {
        self.max_age = Some(secs);
        self
    }

    async fn resolve(&self, origin: Option<&str>) -> Option<String> {
        match &self.allow_origin {
            AllowOrigin::Any => Some("*".to_owned()),
            AllowOrigin::Exact(o) => Some(o.clone()),
            AllowOrigin::List(list) => {
                origin.and_then(|o| list.iter().find(|c| *c == o).cloned())
            }
            AllowOrigin::Resolver(f) => f(origin?).await,
        }
    }

    fn apply_origin(&self, res: &mut Response, origin: &str) {
        res.insert_header("access-control-allow-origin", origin);
        if origin != "*" {
            // Response varies with the requesting origin; caches must know.
            res.append_header("vary", "Origin");
        }
        if self.allow_credentials {
            res.insert_header("access-control-allow-credentials", "true");
        }
    }
}

impl Default for Cors {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for Cors {
    async fn handle(&self, ctx: Context, next: Next<'_>) -> Response {
        let request_origin = ctx.header("origin").map(str::to_owned);
        let allowed = self.resolve(request_origin.as_deref()).await;

        if ctx.method() == Method::OPTIONS {
            let mut res = Response::status(StatusCode::NO_CONTENT);
            if let Some(origin) = &allowed {
                self.apply_origin(&mut res, origin);
            }
            res.insert_header("access-control-allow-methods", &self.allow_methods.join(", "));
            res.insert_header("access-control-allow-headers", &self.allow_headers.join(", "));
            if let Some(max_age) = self.max_age {
                res.insert_header("access-control-max-age", &max_age.to_string());
            }
            return res;
        }

        let mut res = next.run(ctx).await;
        if let Some(origin) = &allowed {
            self.apply_origin(&mut res, origin);
        }
        res
    }

    fn name(&self) -> &'static str {
        "cors"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Chain;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn flagged_terminal(hit: Arc<AtomicBool>) -> impl crate::Handler {
        move |_ctx: Context| {
            let hit = Arc::clone(&hit);
            async move {
                hit.store(true, Ordering::SeqCst);
                Response::text("data")
            }
        }
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_cors_headers() {
        let hit = Arc::new(AtomicBool::new(false));
        let chain = Chain::new(flagged_terminal(Arc::clone(&hit))).with(Cors::new());

        let ctx = Context::test("OPTIONS", "/api", &[("origin", "https://a.test")], b"");
        let res = chain.run(ctx).await;

        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert!(res.header("access-control-allow-methods").is_some());
        assert!(res.header("access-control-allow-headers").is_some());
        assert_eq!(res.header("access-control-max-age"), Some("86400"));
        assert!(!hit.load(Ordering::SeqCst), "terminal must not run on preflight");
    }

    #[tokio::test]
    async fn wildcard_origin_on_regular_requests() {
        let hit = Arc::new(AtomicBool::new(false));
        let chain = Chain::new(flagged_terminal(Arc::clone(&hit))).with(Cors::new());

        let res = chain.run(Context::test("GET", "/api", &[], b"")).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
        assert!(res.headers().get("vary").is_none());
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn allow_list_echoes_matching_origin() {
        let chain = Chain::new(|_ctx: Context| async { Response::text("ok") }).with(
            Cors::new().allow_origins(vec![
                "https://app1.test".to_owned(),
                "https://app2.test".to_owned(),
            ]),
        );

        let ctx = Context::test("GET", "/", &[("origin", "https://app2.test")], b"");
        let res = chain.run(ctx).await;
        assert_eq!(res.header("access-control-allow-origin"), Some("https://app2.test"));
        assert_eq!(res.header("vary"), Some("Origin"));
    }

    #[tokio::test]
    async fn allow_list_blocks_unknown_origin() {
        let chain = Chain::new(|_ctx: Context| async { Response::text("ok") })
            .with(Cors::new().allow_origins(vec!["https://app1.test".to_owned()]));

        let ctx = Context::test("GET", "/", &[("origin", "https://evil.test")], b"");
        let res = chain.run(ctx).await;
        assert_eq!(res.header("access-control-allow-origin"), None);
    }

    #[tokio::test]
    async fn credentials_with_wildcard_blocks_everything() {
        let chain = Chain::new(|_ctx: Context| async { Response::text("ok") })
            .with(Cors::new().allow_credentials(true));

        let ctx = Context::test("GET", "/", &[("origin", "https://a.test")], b"");
        let res = chain.run(ctx).await;
        assert_eq!(res.header("access-control-allow-origin"), None);
    }

    #[tokio::test]
    async fn async_resolver_decides_per_origin() {
        let cors = Cors::new().allow_origin_fn(|origin: &str| {
            let origin = origin.to_owned();
            Box::pin(async move {
                origin.ends_with(".example.com").then_some(origin)
            })
        });
        let chain = Chain::new(|_ctx: Context| async { Response::text("ok") }).with(cors);

        let ctx = Context::test("GET", "/", &[("origin", "https://a.example.com")], b"");
        let res = chain.run(ctx).await;
        assert_eq!(
            res.header("access-control-allow-origin"),
            Some("https://a.example.com")
        );

        let ctx = Context::test("GET", "/", &[("origin", "https://other.test")], b"");
        let res = chain.run(ctx).await;
        assert_eq!(res.header("access-control-allow-origin"), None);
    }
}
