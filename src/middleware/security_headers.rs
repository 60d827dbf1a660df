//! Security headers middleware.
//!
//! Stamps a fixed set of response headers on everything that comes back up
//! the chain — including error responses produced by later entries or the
//! terminal handler. Register it early so nothing escapes without them.

use async_trait::async_trait;

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// A `Content-Security-Policy` value assembled from directives.
///
/// ```rust
/// use tsuba::middleware::Csp;
///
/// let csp = Csp::new()
///     .directive("default-src", &["'self'"])
///     .directive("script-src", &["'self'", "https://cdn.example.com"]);
/// assert_eq!(
///     csp.header_value(),
///     "default-src 'self'; script-src 'self' https://cdn.example.com"
/// );
/// ```
#[derive(Clone, Default)]
pub struct Csp {
    directives: Vec<(String, Vec<String>)>,
}

impl Csp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directive(mut self, name: impl Into<String>, sources: &[&str]) -> Self {
        self.directives
            .push((name.into(), sources.iter().map(|s| (*s).to_owned()).collect()));
        self
    }

    pub fn header_value(&self) -> String {
        self.directives
            .iter()
            .map(|(name, sources)| {
                if sources.is_empty() {
                    name.clone()
                } else {
                    format!("{name} {}", sources.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Security headers middleware.
///
/// Defaults:
///
/// | Header | Value |
/// |---|---|
/// | `X-Content-Type-Options` | `nosniff` |
/// | `X-Frame-Options` | `SAMEORIGIN` |
/// | `X-XSS-Protection` | `1; mode=block` |
/// | `Strict-Transport-Security` | `max-age=31536000; includeSubDomains` |
/// | `Referrer-Policy` | `strict-origin-when-cross-origin` |
///
/// `Content-Security-Policy` is only emitted when configured via
/// [`SecurityHeaders::csp`].
pub struct SecurityHeaders {
    content_type_options: String,
    frame_options: String,
    xss_protection: String,
    hsts: String,
    referrer_policy: String,
    csp: Option<Csp>,
}

impl SecurityHeaders {
    pub fn new() -> Self {
        Self {
            content_type_options: "nosniff".to_owned(),
            frame_options: "SAMEORIGIN".to_owned(),
            xss_protection: "1; mode=block".to_owned(),
            hsts: "max-age=31536000; includeSubDomains".to_owned(),
            referrer_policy: "strict-origin-when-cross-origin".to_owned(),
            csp: None,
        }
    }

    /// `DENY` instead of `SAMEORIGIN`, HSTS preload, and a restrictive CSP.
    pub fn strict() -> Self {
        let mut this = Self::new();
        this.frame_options = "DENY".to_owned();
        this.hsts = "max-age=63072000; includeSubDomains; preload".to_owned();
        this.csp = Some(
            Csp::new()
                .directive("default-src", &["'self'"])
                .directive("object-src", &["'none'"])
                .directive("base-uri", &["'self'"])
                .directive("frame-ancestors", &["'none'"]),
        );
        this
    }

    pub fn frame_options(mut self, value: impl Into<String>) -> Self {
        self.frame_options = value.into();
        self
    }

    pub fn hsts(mut self, value: impl Into<String>) -> Self {
        self.hsts = value.into();
        self
    }

    pub fn referrer_policy(mut self, value: impl Into<String>) -> Self {
        self.referrer_policy = value.into();
        self
    }

    pub fn csp(mut self, csp: Csp) -> Self {
        self.csp = Some(csp);
        self
    }
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for SecurityHeaders {
    async fn handle(&self, ctx: Context, next: Next<'_>) -> Response {
        let mut res = next.run(ctx).await;
        res.insert_header("x-content-type-options", &self.content_type_options);
        res.insert_header("x-frame-options", &self.frame_options);
        res.insert_header("x-xss-protection", &self.xss_protection);
        res.insert_header("strict-transport-security", &self.hsts);
        res.insert_header("referrer-policy", &self.referrer_policy);
        if let Some(csp) = &self.csp {
            res.insert_header("content-security-policy", &csp.header_value());
        }
        res
    }

    fn name(&self) -> &'static str {
        "security_headers"
    }
}
