//! CSRF protection middleware.
//!
//! Tokens are bound to a per-session 32-byte secret carried in an HttpOnly
//! cookie. A token is `base64url(nonce ‖ keyed-BLAKE3(secret, nonce))`; with
//! a fresh nonce per token, any number of tokens can be issued and verified
//! against the same secret, and nothing needs to be stored server-side.
//!
//! State-changing methods must present a valid token in the `x-csrf-token`
//! header or the `_csrf` form field. Validation failure short-circuits the
//! chain with a `403` JSON response — the one deliberate in-band error this
//! crate's middleware produce. Safe methods pass through; they get a secret
//! cookie minted when missing, and every request that continues downstream
//! exposes a [`CsrfTokens`] issuer through the context data map so handlers
//! can embed tokens in forms and meta tags.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use http::{Method, StatusCode};
use rand::RngCore;
use thiserror::Error;

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Context data key under which [`CsrfTokens`] is exposed to downstream
/// handlers: `ctx.get::<CsrfTokens>(CSRF_TOKENS_KEY)`.
pub const CSRF_TOKENS_KEY: &str = "csrf_tokens";

const NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;
const TOKEN_LEN: usize = NONCE_LEN + MAC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
enum CsrfError {
    #[error("csrf token missing")]
    Missing,
    #[error("csrf token invalid")]
    Invalid,
}

/// Issues and verifies tokens for one session secret.
///
/// Cloneable so it can be dropped into the context data map per request.
#[derive(Clone)]
pub struct CsrfTokens {
    secret: [u8; 32],
}

impl CsrfTokens {
    fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Issues a fresh token for embedding in a form field or meta tag.
    pub fn issue(&self) -> String {
        let mut token = [0u8; TOKEN_LEN];
        rand::thread_rng().fill_bytes(&mut token[..NONCE_LEN]);
        let mac = blake3::keyed_hash(&self.secret, &token[..NONCE_LEN]);
        token[NONCE_LEN..].copy_from_slice(mac.as_bytes());
        URL_SAFE_NO_PAD.encode(token)
    }

    /// Verifies a token against this secret. The MAC comparison goes through
    /// `blake3::Hash`'s constant-time equality.
    pub fn verify(&self, token: &str) -> bool {
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        if bytes.len() != TOKEN_LEN {
            return false;
        }
        let Ok(mac) = <[u8; MAC_LEN]>::try_from(&bytes[NONCE_LEN..]) else {
            return false;
        };
        blake3::keyed_hash(&self.secret, &bytes[..NONCE_LEN]) == blake3::Hash::from_bytes(mac)
    }
}

/// CSRF middleware.
///
/// ```rust
/// use tsuba::Router;
/// use tsuba::middleware::Csrf;
///
/// let app = Router::new().with(Csrf::new());
/// ```
pub struct Csrf {
    cookie_name: String,
    header_name: String,
    field_name: String,
    ignore_methods: Vec<Method>,
}

impl Csrf {
    pub fn new() -> Self {
        Self {
            cookie_name: "csrf_secret".to_owned(),
            header_name: "x-csrf-token".to_owned(),
            field_name: "_csrf".to_owned(),
            ignore_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE],
        }
    }

    /// Name of the secret cookie. Default `csrf_secret`.
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Header carrying the token. Default `x-csrf-token`.
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Form field carrying the token. Default `_csrf`.
    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Methods exempt from validation. Default: GET, HEAD, OPTIONS, TRACE.
    pub fn ignore_methods(mut self, methods: Vec<Method>) -> Self {
        self.ignore_methods = methods;
        self
    }

    /// Reads the session secret from the cookie. A missing, undecodable, or
    /// wrong-length value all read as absent.
    fn secret_from(&self, ctx: &Context) -> Option<[u8; 32]> {
        let raw = ctx.cookie(&self.cookie_name)?;
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        bytes.try_into().ok()
    }

    fn token_from(&self, ctx: &Context) -> Option<String> {
        if let Some(token) = ctx.header(&self.header_name) {
            return Some(token.to_owned());
        }
        let is_form = ctx
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if !is_form {
            return None;
        }
        let body = String::from_utf8_lossy(ctx.body());
        form_field(&body, &self.field_name)
    }
}

impl Default for Csrf {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for Csrf {
    async fn handle(&self, mut ctx: Context, next: Next<'_>) -> Response {
        let needs_validation = !self.ignore_methods.contains(ctx.method());

        if needs_validation {
            let Some(secret) = self.secret_from(&ctx) else {
                return reject(CsrfError::Missing);
            };
            let tokens = CsrfTokens::new(secret);
            let Some(token) = self.token_from(&ctx) else {
                return reject(CsrfError::Missing);
            };
            if !tokens.verify(&token) {
                return reject(CsrfError::Invalid);
            }
            ctx.set(CSRF_TOKENS_KEY, tokens);
            return next.run(ctx).await;
        }

        // Safe method: make sure a secret exists so the client can obtain
        // tokens before its first state-changing request.
        let (secret, minted) = match self.secret_from(&ctx) {
            Some(secret) => (secret, false),
            None => {
                let mut secret = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                (secret, true)
            }
        };
        ctx.set(CSRF_TOKENS_KEY, CsrfTokens::new(secret));

        let mut res = next.run(ctx).await;
        if minted {
            res.append_header(
                "set-cookie",
                &format!(
                    "{}={}; Path=/; HttpOnly; SameSite=Lax",
                    self.cookie_name,
                    URL_SAFE_NO_PAD.encode(secret)
                ),
            );
        }
        res
    }

    fn name(&self) -> &'static str {
        "csrf"
    }
}

fn reject(error: CsrfError) -> Response {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .json(serde_json::json!({ "error": error.to_string() }).to_string().into_bytes())
}

/// Pulls one field out of a URL-encoded form body.
fn form_field(body: &str, field: &str) -> Option<String> {
    body.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == field).then(|| url_decode(value))
    })
}

fn url_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = s
                    .get(i + 1..i + 3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Chain;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn secret() -> [u8; 32] {
        [7u8; 32]
    }

    fn cookie_header() -> String {
        format!("csrf_secret={}", URL_SAFE_NO_PAD.encode(secret()))
    }

    fn flagged_terminal(hit: Arc<AtomicBool>) -> impl crate::Handler {
        move |_ctx: Context| {
            let hit = Arc::clone(&hit);
            async move {
                hit.store(true, Ordering::SeqCst);
                Response::text("handled")
            }
        }
    }

    #[test]
    fn tokens_issue_and_verify() {
        let tokens = CsrfTokens::new(secret());
        let a = tokens.issue();
        let b = tokens.issue();
        assert_ne!(a, b, "fresh nonce per token");
        assert!(tokens.verify(&a));
        assert!(tokens.verify(&b));
    }

    #[test]
    fn tampered_and_foreign_tokens_fail() {
        let tokens = CsrfTokens::new(secret());
        let token = tokens.issue();

        let mut tampered = token.clone();
        let flipped = if tampered.ends_with('A') { 'B' } else { 'A' };
        tampered.pop();
        tampered.push(flipped);
        assert!(!tokens.verify(&tampered));

        assert!(!tokens.verify("not-base64!!"));
        assert!(!tokens.verify(""));

        let other = CsrfTokens::new([9u8; 32]);
        assert!(!other.verify(&token), "token must not verify under another secret");
    }

    #[tokio::test]
    async fn valid_header_token_passes() {
        let hit = Arc::new(AtomicBool::new(false));
        let chain = Chain::new(flagged_terminal(Arc::clone(&hit))).with(Csrf::new());

        let token = CsrfTokens::new(secret()).issue();
        let cookie = cookie_header();
        let ctx = Context::test(
            "POST",
            "/submit",
            &[("cookie", &cookie), ("x-csrf-token", &token)],
            b"",
        );
        let res = chain.run(ctx).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn valid_form_field_token_passes() {
        let chain = Chain::new(|_ctx: Context| async { Response::text("ok") }).with(Csrf::new());

        let token = CsrfTokens::new(secret()).issue();
        let cookie = cookie_header();
        let body = format!("name=alice&_csrf={token}");
        let ctx = Context::test(
            "POST",
            "/submit",
            &[("cookie", &cookie), ("content-type", "application/x-www-form-urlencoded")],
            body.as_bytes(),
        );
        let res = chain.run(ctx).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tampered_token_rejected_before_terminal() {
        let hit = Arc::new(AtomicBool::new(false));
        let chain = Chain::new(flagged_terminal(Arc::clone(&hit))).with(Csrf::new());

        let mut token = CsrfTokens::new(secret()).issue();
        token.replace_range(0..2, "zz");
        let cookie = cookie_header();
        let ctx = Context::test(
            "POST",
            "/submit",
            &[("cookie", &cookie), ("x-csrf-token", &token)],
            b"",
        );
        let res = chain.run(ctx).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert!(!hit.load(Ordering::SeqCst), "terminal must not run");
    }

    #[tokio::test]
    async fn missing_cookie_rejected() {
        let chain = Chain::new(|_ctx: Context| async { Response::text("ok") }).with(Csrf::new());
        let ctx = Context::test("POST", "/submit", &[("x-csrf-token", "whatever")], b"");
        let res = chain.run(ctx).await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn safe_method_mints_secret_and_exposes_issuer() {
        async fn embeds_token(ctx: Context) -> Response {
            match ctx.get::<CsrfTokens>(CSRF_TOKENS_KEY) {
                Some(tokens) => Response::text(tokens.issue()),
                None => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
            }
        }

        let chain = Chain::new(embeds_token).with(Csrf::new());
        let res = chain.run(Context::test("GET", "/form", &[], b"")).await;

        assert_eq!(res.status_code(), StatusCode::OK);
        let set_cookie = res.header("set-cookie").expect("secret cookie minted");
        assert!(set_cookie.starts_with("csrf_secret="));
        assert!(set_cookie.contains("HttpOnly"));

        // The issued token must verify against the minted secret.
        let raw = set_cookie
            .trim_start_matches("csrf_secret=")
            .split(';')
            .next()
            .unwrap();
        let secret: [u8; 32] =
            URL_SAFE_NO_PAD.decode(raw).unwrap().try_into().unwrap();
        let token = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(CsrfTokens::new(secret).verify(&token));
    }

    #[tokio::test]
    async fn existing_secret_not_reminted() {
        let chain = Chain::new(|_ctx: Context| async { Response::text("ok") }).with(Csrf::new());
        let cookie = cookie_header();
        let ctx = Context::test("GET", "/", &[("cookie", &cookie)], b"");
        let res = chain.run(ctx).await;
        assert_eq!(res.header("set-cookie"), None);
    }

    #[test]
    fn form_field_extraction() {
        assert_eq!(form_field("_csrf=abc&x=1", "_csrf"), Some("abc".to_owned()));
        assert_eq!(form_field("x=1&_csrf=xyz", "_csrf"), Some("xyz".to_owned()));
        assert_eq!(form_field("x=1&y=2", "_csrf"), None);
        assert_eq!(form_field("_csrf=a%2Bb", "_csrf"), Some("a+b".to_owned()));
        assert_eq!(form_field("", "_csrf"), None);
    }

    #[test]
    fn url_decoding() {
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("a%2Bb"), "a+b");
        assert_eq!(url_decode("plain"), "plain");
        // Truncated escapes pass through.
        assert_eq!(url_decode("bad%2"), "bad%2");
    }
}
