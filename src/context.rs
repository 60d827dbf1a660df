//! Request-scoped context.
//!
//! A [`Context`] is created fresh for every inbound request, threaded through
//! the middleware chain, and dropped once the response has been produced. It
//! is never shared across requests.
//!
//! Besides the parsed request itself it carries:
//!
//! - route parameters extracted by the router (`{name}` segments)
//! - the instant the request entered the pipeline
//! - a string-keyed map of arbitrary values for inter-middleware
//!   communication — e.g. the CSRF middleware exposes its token-issuing
//!   capability to downstream handlers through it

use std::any::Any;
use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

/// The per-request context handed to middleware and handlers.
pub struct Context {
    parts: http::request::Parts,
    body: Bytes,
    params: HashMap<String, String>,
    started_at: Instant,
    data: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Context {
    pub(crate) fn new(
        parts: http::request::Parts,
        body: Bytes,
        params: HashMap<String, String>,
    ) -> Self {
        Self { parts, body, params, started_at: Instant::now(), data: HashMap::new() }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The buffered request body. tsuba does not interpret the bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `ctx.param("id")` on `/users/42` returns
    /// `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The instant this context was created, i.e. when the request entered
    /// the pipeline. Middleware measuring latency should prefer this over
    /// taking its own timestamp.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Stores a value in the context data map, replacing any previous value
    /// under the same key.
    pub fn set<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.data.insert(key, Box::new(value));
    }

    /// Retrieves a value stored by an upstream middleware. Returns `None` if
    /// the key is absent or holds a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref())
    }

    /// Looks up a cookie by name in the `Cookie` request header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let raw = self.header("cookie")?;
        raw.split(';').map(str::trim).find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then_some(v)
        })
    }

    #[cfg(test)]
    pub(crate) fn test(
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Self {
        let mut builder = http::Request::builder().method(method).uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        Self::new(parts, Bytes::copy_from_slice(body), HashMap::new())
    }
}
