//! Response compression middleware.
//!
//! Negotiates `Accept-Encoding` and compresses the response payload with
//! gzip or deflate. Runs entirely on the way back up the chain: the
//! downstream response must exist before there is anything to compress.
//!
//! A response is left untouched when any of these hold:
//! - the client did not offer a supported encoding (or disabled it via `q=0`)
//! - the body is smaller than the configured minimum
//! - the content-type is not worth compressing (already-compressed formats)
//! - a `Content-Encoding` is already set
//! - the request was `HEAD`
//!
//! Encoder failure falls back to the identity body rather than erroring.

use std::io::Write;

use async_trait::async_trait;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use http::Method;

use crate::context::Context;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Bodies below this many bytes are not worth the CPU or the header overhead.
const DEFAULT_MIN_SIZE: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }
}

/// Compression middleware.
///
/// ```rust
/// use tsuba::Router;
/// use tsuba::middleware::Compress;
///
/// let app = Router::new().with(Compress::new().min_size(512));
/// ```
pub struct Compress {
    min_size: usize,
    level: Compression,
}

impl Compress {
    pub fn new() -> Self {
        Self { min_size: DEFAULT_MIN_SIZE, level: Compression::default() }
    }

    /// Minimum body size, in bytes, before compression kicks in.
    pub fn min_size(mut self, bytes: usize) -> Self {
        self.min_size = bytes;
        self
    }

    /// Compression level, 0–9. Higher values are clamped to 9.
    pub fn level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }
}

impl Default for Compress {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for Compress {
    async fn handle(&self, ctx: Context, next: Next<'_>) -> Response {
        // The context moves downstream; capture the negotiation inputs now.
        let accept = ctx.header("accept-encoding").map(str::to_ascii_lowercase);
        let is_head = ctx.method() == Method::HEAD;

        let mut res = next.run(ctx).await;

        if is_head
            || res.body().len() < self.min_size
            || res.header("content-encoding").is_some()
            || !is_compressible(res.header("content-type"))
        {
            return res;
        }
        let Some(encoding) = negotiate(accept.as_deref()) else {
            return res;
        };

        match encode(encoding, self.level, res.body()) {
            Ok(compressed) => {
                res.set_body(compressed);
                res.insert_header("content-encoding", encoding.as_str());
                res.append_header("vary", "Accept-Encoding");
            }
            Err(e) => {
                // Identity body is always a valid response.
                tracing::warn!("compression failed, sending identity body: {e}");
            }
        }
        res
    }

    fn name(&self) -> &'static str {
        "compress"
    }
}

/// Picks an encoding from an `Accept-Encoding` header (already lowercased).
/// Prefers gzip over deflate. Respects `q=0` opt-outs; otherwise q-values are
/// ignored rather than ranked.
fn negotiate(accept: Option<&str>) -> Option<Encoding> {
    let accept = accept?;
    let mut gzip = false;
    let mut deflate = false;

    for part in accept.split(',') {
        let mut pieces = part.trim().splitn(2, ';');
        let name = pieces.next().unwrap_or("").trim();
        let refused = pieces
            .next()
            .and_then(|p| p.trim().strip_prefix("q="))
            .and_then(|q| q.trim().parse::<f32>().ok())
            .is_some_and(|q| q == 0.0);
        if refused {
            continue;
        }
        match name {
            "gzip" | "*" => gzip = true,
            "deflate" => deflate = true,
            _ => {}
        }
    }

    if gzip {
        Some(Encoding::Gzip)
    } else if deflate {
        Some(Encoding::Deflate)
    } else {
        None
    }
}

/// Text and structured formats compress well; media formats are already
/// compressed and only grow.
fn is_compressible(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json"
                | "application/javascript"
                | "application/xml"
                | "application/xhtml+xml"
                | "application/rss+xml"
                | "image/svg+xml"
        )
}

fn encode(encoding: Encoding, level: Compression, body: &[u8]) -> std::io::Result<Vec<u8>> {
    match encoding {
        Encoding::Gzip => {
            let mut enc = GzEncoder::new(Vec::new(), level);
            enc.write_all(body)?;
            enc.finish()
        }
        Encoding::Deflate => {
            let mut enc = ZlibEncoder::new(Vec::new(), level);
            enc.write_all(body)?;
            enc.finish()
        }
    }
}
