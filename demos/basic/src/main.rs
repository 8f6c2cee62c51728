use std::{net::SocketAddr, sync::Arc};

use axum::{extract::ConnectInfo, routing::post_service, Router};
use http::Request;
use image_xform_pipeline::{
    rate_limit::{KeyExtractor, RateLimitLayer, RateLimiter, RateLimiterConfig},
    ImageTransformerBuilder,
};
use tower::ServiceBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keys clients by the peer address axum records for each connection.
#[derive(Debug, Clone, Copy)]
struct ConnectedIp;

impl KeyExtractor for ConnectedIp {
    fn extract<B>(&self, req: &Request<B>) -> Option<String> {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(
            |_| "demo_basic=debug,image_xform_pipeline=debug".into(),
        )))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    // Shared by every request for the lifetime of the server.
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));

    let image_xformer = ServiceBuilder::new()
        .layer(RateLimitLayer::new(limiter, ConnectedIp))
        .service(ImageTransformerBuilder::new().build());

    // Nest service within an Axum app at `/_image` path.
    let app = Router::new().nest_service("/_image", post_service(image_xformer));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!(
        %addr,
        "try: curl --data-binary @photo.png http://{addr}/_image/resize_100:100,rotate_30,format_png -o out.png"
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
