//! # Overview
//!
//! This crate provides an image transformation pipeline (resize, crop,
//! rotate, flip, mirror, color filters and a watermark), JPEG/PNG encoding,
//! and per-client token-bucket rate limiting, packaged as `tower` services.
//!
//! The core is synchronous and free of I/O:
//!
//! - [`pipeline::apply`] runs the steps of a [`TransformSpec`] in a fixed order,
//! - [`encode::encode`] serializes the result,
//! - [`process`] does both.
//!
//! [`ImageTransformer`] wraps the core as a service taking the source image as
//! the request body, and [`rate_limit::RateLimitLayer`] guards admission.
//!
//! # Usage with an `axum` application
//!
//! ```rust,no_run
//! use std::{net::SocketAddr, sync::Arc};
//!
//! use axum::{routing::post_service, Router};
//! use http::header::HeaderName;
//! use image_xform_pipeline::{
//!     rate_limit::{HeaderKey, RateLimitLayer, RateLimiter, RateLimiterConfig},
//!     ImageTransformerBuilder,
//! };
//! use tower::ServiceBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One limiter for the lifetime of the server.
//!     let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
//!
//!     let image_xformer = ServiceBuilder::new()
//!         .layer(RateLimitLayer::new(
//!             limiter,
//!             HeaderKey(HeaderName::from_static("x-forwarded-for")),
//!         ))
//!         .service(ImageTransformerBuilder::new().build());
//!
//!     // POST an image to e.g. `/_image/resize_100:100,rotate_30,format_png`.
//!     let app = Router::new().nest_service("/_image", post_service(image_xformer));
//!
//!     let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
//!     let listener = tokio::net::TcpListener::bind(&addr).await?;
//!     axum::serve(listener, app.into_make_service()).await?;
//!
//!     Ok(())
//! }
//! ```
#![warn(
    clippy::all,
    nonstandard_style,
    future_incompatible,
    missing_docs,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

use image::DynamicImage;
use tracing::instrument;

pub mod decode;
pub mod encode;
mod error;
pub mod format;
pub mod pipeline;
pub mod rate_limit;
mod service;
pub mod transform_spec;

pub use encode::EncodedImage;
pub use error::Error;
pub use format::OutputFormat;
pub use service::{ImageTransformer, ImageTransformerBuilder, DEFAULT_MAX_BODY_BYTES};
pub use transform_spec::TransformSpec;

/// Transform `source` as `spec` describes and encode the result in
/// `spec.format`.
///
/// An unsupported format is reported before any transform runs.
#[instrument(skip_all, fields(spec = %spec), err)]
pub fn process(source: DynamicImage, spec: &TransformSpec) -> Result<EncodedImage, Error> {
    spec.format.parse::<OutputFormat>()?;

    let image = pipeline::apply(source, spec)?;
    Ok(encode::encode(&image, &spec.format, spec.compress)?)
}
