//! Radix-tree request router and middleware registration.
//!
//! One tree per HTTP method, O(path-length) lookup via [`matchit`]. The
//! router also owns the ordered middleware chain: every request — matched or
//! not — flows through the same chain, so policy headers land on 404s too.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::Middleware;
use crate::response::Response;

async fn default_not_found(_ctx: Context) -> Response {
    Response::status(http::StatusCode::NOT_FOUND)
}

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each registration returns `self` so calls chain naturally:
///
/// ```rust,no_run
/// # use tsuba::{Context, Response, Router};
/// # use tsuba::middleware::{SecurityHeaders, Trace};
/// # async fn get_user(_: Context) -> Response { Response::text("") }
/// # async fn create_user(_: Context) -> Response { Response::text("") }
/// let app = Router::new()
///     .with(Trace::new())
///     .with(SecurityHeaders::new())
///     .get("/users/{id}", get_user)
///     .post("/users", create_user);
/// ```
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    middleware: Vec<Arc<dyn Middleware>>,
    not_found: BoxedHandler,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            middleware: Vec::new(),
            not_found: default_not_found.into_boxed_handler(),
        }
    }

    /// Appends a middleware entry to the chain. Entries run for every
    /// request, in registration order, before the route handler.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax — `ctx.param("name")` retrieves
    /// them.
    ///
    /// # Panics
    ///
    /// Panics at registration time on an invalid or conflicting route
    /// pattern. Routes are registered at startup; a bad pattern is a
    /// programming error, not a runtime condition.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    pub fn head(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::HEAD, path, handler)
    }

    pub fn options(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::OPTIONS, path, handler)
    }

    /// Replaces the default `404 Not Found` handler. Unmatched requests
    /// still pass through the full middleware chain first.
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = handler.into_boxed_handler();
        self
    }

    pub(crate) fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }

    /// Resolves a request to its handler. Unmatched requests resolve to the
    /// not-found handler with empty params.
    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> (BoxedHandler, HashMap<String, String>) {
        let matched = self
            .routes
            .get(method)
            .and_then(|tree| tree.at(path).ok());
        match matched {
            Some(m) => {
                let params = m
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                (Arc::clone(m.value), params)
            }
            None => (Arc::clone(&self.not_found), HashMap::new()),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
