//! Minimal tsuba example — a JSON API behind the full policy chain.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -i http://localhost:3000/form          # note the csrf_secret cookie
//!   curl -i -X OPTIONS http://localhost:3000/users \
//!        -H 'origin: http://localhost:5173'     # CORS preflight, answered in-chain
//!   curl -i -X POST http://localhost:3000/users # 403 — no CSRF token
//!   curl http://localhost:3000/healthz

use std::time::Duration;

use tsuba::middleware::{
    Compress, Cors, Csrf, CsrfTokens, SecurityHeaders, Timeout, Trace, CSRF_TOKENS_KEY,
};
use tsuba::{Context, Response, Router, Server, health};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // Registration order is execution order: tracing wraps everything,
    // security headers land on every response, CORS answers preflights
    // before CSRF can reject them.
    let app = Router::new()
        .with(Trace::new())
        .with(Timeout::after(Duration::from_secs(30)))
        .with(SecurityHeaders::new())
        .with(Cors::new().allow_origins(vec!["http://localhost:5173".to_owned()]))
        .with(Compress::new())
        .with(Csrf::new())
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .get("/form", render_form)
        .get("/healthz", health::liveness)
        .get("/readyz", health::readiness);

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// GET /users/{id}
async fn get_user(ctx: Context) -> Response {
    let id = ctx.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

// POST /users — only reachable with a valid CSRF token.
async fn create_user(ctx: Context) -> Response {
    if ctx.body().is_empty() {
        return Response::status(http::StatusCode::BAD_REQUEST);
    }
    Response::builder()
        .status(http::StatusCode::CREATED)
        .header("location", "/users/99")
        .json(br#"{"id":"99"}"#.to_vec())
}

// GET /form — embeds a token issued by the CSRF middleware upstream.
async fn render_form(ctx: Context) -> Response {
    let token = ctx
        .get::<CsrfTokens>(CSRF_TOKENS_KEY)
        .map(CsrfTokens::issue)
        .unwrap_or_default();
    Response::html(format!(
        r#"<form method="post" action="/users">
  <input type="hidden" name="_csrf" value="{token}">
  <input name="name"><button>create</button>
</form>"#
    ))
}
