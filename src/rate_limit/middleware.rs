//! Admission control as a `tower` layer.
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::future::{self, Either, Ready};
use http::{header::HeaderName, Request, Response, StatusCode};
use tower_layer::Layer;
use tower_service::Service;

use super::RateLimiter;
use crate::service::response_with_status;

/// Key shared by every request whose client cannot be identified.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the client key a request is rate limited under.
pub trait KeyExtractor: Clone {
    /// Returns the client key, or `None` if the request carries none.
    fn extract<B>(&self, req: &Request<B>) -> Option<String>;
}

/// Keys requests by the IP address of a bare [`SocketAddr`] request
/// extension.
///
/// Servers do not insert that extension on their own. axum, for one, stores
/// the peer as `ConnectInfo<SocketAddr>`, which this extractor does not see;
/// every such request would fall into the shared [`UNKNOWN_CLIENT`] bucket.
/// Use `PeerAddr` only behind an accept loop or layer that inserts the
/// address itself, and otherwise implement [`KeyExtractor`] for the wrapper
/// the server uses.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddr;

impl KeyExtractor for PeerAddr {
    fn extract<B>(&self, req: &Request<B>) -> Option<String> {
        req.extensions()
            .get::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
    }
}

/// Keys requests by the first comma-separated entry of a header, such as
/// `x-forwarded-for`.
#[derive(Debug, Clone)]
pub struct HeaderKey(pub HeaderName);

impl KeyExtractor for HeaderKey {
    fn extract<B>(&self, req: &Request<B>) -> Option<String> {
        let value = req.headers().get(&self.0)?.to_str().ok()?;
        let first = value.split(',').next()?.trim();
        (!first.is_empty()).then(|| first.to_owned())
    }
}

/// Layer applying [`RateLimit`] to a service.
///
/// ```rust
/// use std::sync::Arc;
///
/// use http::header::HeaderName;
/// use image_xform_pipeline::{
///     rate_limit::{HeaderKey, RateLimitLayer, RateLimiter},
///     ImageTransformerBuilder,
/// };
/// use tower_layer::Layer;
///
/// let limiter = Arc::new(RateLimiter::default());
/// let layer = RateLimitLayer::new(
///     limiter,
///     HeaderKey(HeaderName::from_static("x-forwarded-for")),
/// );
/// let service = layer.layer(ImageTransformerBuilder::new().build());
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitLayer<K> {
    limiter: Arc<RateLimiter>,
    extractor: K,
}

impl<K: KeyExtractor> RateLimitLayer<K> {
    /// Create a layer admitting requests through `limiter`, keyed by
    /// `extractor`.
    ///
    /// Requests the extractor cannot identify share one bucket, so pick an
    /// extractor matching what the server actually records about the client.
    pub fn new(limiter: Arc<RateLimiter>, extractor: K) -> Self {
        Self { limiter, extractor }
    }
}

impl<S, K: Clone> Layer<S> for RateLimitLayer<K> {
    type Service = RateLimit<S, K>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner,
            limiter: Arc::clone(&self.limiter),
            extractor: self.extractor.clone(),
        }
    }
}

/// Middleware answering `429 Too Many Requests` once a client's bucket is
/// empty; admitted requests reach the inner service untouched.
#[derive(Debug, Clone)]
pub struct RateLimit<S, K> {
    inner: S,
    limiter: Arc<RateLimiter>,
    extractor: K,
}

impl<S, K, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimit<S, K>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    K: KeyExtractor,
    ResBody: Default,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Either<Ready<Result<Self::Response, Self::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let key = self
            .extractor
            .extract(&req)
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_owned());

        if self.limiter.allow(&key) {
            Either::Right(self.inner.call(req))
        } else {
            tracing::warn!(client = %key, uri = %req.uri(), "rate limit exceeded");
            Either::Left(future::ready(Ok(response_with_status(
                StatusCode::TOO_MANY_REQUESTS,
            ))))
        }
    }
}
