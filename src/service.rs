use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::Future;
use http::{header, HeaderMap, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use percent_encoding::percent_decode_str;
use tokio::task;
use tower_service::Service;
use tracing::instrument;

use crate::{
    decode::decode, encode::EncodedImage, process, transform_spec::TransformSpec, Error,
};

/// Largest request body accepted by default: 16 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Service transforming the image in a request body.
///
/// The request path holds the transform parameters in their compact form and
/// the body holds the source image:
///
/// ```text
/// POST /resize_100:100,rotate_30,flip,filter_grayscale,format_png
/// ```
///
/// The response body is the encoded result, with `Content-Type` set to the
/// output format's media type.
#[derive(Debug, Clone)]
pub struct ImageTransformer {
    max_body_bytes: usize,
}

/// Builder for [`ImageTransformer`].
#[derive(Debug)]
pub struct ImageTransformerBuilder {
    max_body_bytes: usize,
}

impl ImageTransformerBuilder {
    /// Create a new [`ImageTransformerBuilder`].
    pub const fn new() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Configure the largest accepted request body, in bytes.
    pub fn set_max_body_bytes(self, max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }

    /// Build the [`ImageTransformer`].
    pub fn build(self) -> ImageTransformer {
        ImageTransformer {
            max_body_bytes: self.max_body_bytes,
        }
    }
}

impl Default for ImageTransformerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<ReqBody> Service<Request<ReqBody>> for ImageTransformer
where
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let max_body_bytes = self.max_body_bytes;

        Box::pin(async move {
            let uri = req.uri().clone();

            // Expected format should follow:
            //
            //   /{transform_param1},...,{transform_paramN}
            //
            // For example:
            //
            //   /resize_100:100,crop_0:0:50:50,rotate_30,flip,filter_sepia,format_png
            let Ok(params) = percent_decode_str(uri.path().trim_matches('/')).decode_utf8() else {
                tracing::error!(uri = %uri, "path is not valid UTF-8");
                return Ok(response_with_status(StatusCode::BAD_REQUEST));
            };

            let spec = match params.parse::<TransformSpec>() {
                Err(err) => {
                    tracing::error!(uri = %uri, err = %err, "invalid transformation parameters");
                    return Ok(error_response(&err.into()));
                }

                Ok(spec) => spec,
            };

            let image_bytes = match Limited::new(req.into_body(), max_body_bytes)
                .collect()
                .await
            {
                Err(err) if err.is::<LengthLimitError>() => {
                    tracing::error!(limit = max_body_bytes, "image body too large");
                    return Ok(response_with_status(StatusCode::PAYLOAD_TOO_LARGE));
                }

                Err(err) => {
                    tracing::error!(err = %err, "failed to read image bytes");
                    return Ok(response_with_status(StatusCode::BAD_REQUEST));
                }

                Ok(collected) => collected.to_bytes(),
            };

            // Transforming is CPU-bound, so we spawn a dedicated blocking task.
            let transformed_image =
                match task::spawn_blocking(move || transform_image(&image_bytes, &spec)).await {
                    // Something went wrong with the task.
                    Err(err) => {
                        tracing::error!(err = %err, "failed to transform image (task failed)");
                        return Ok(response_with_status(StatusCode::INTERNAL_SERVER_ERROR));
                    }

                    // The request could not be fulfilled; already logged by `transform_image`.
                    Ok(Err(err)) => return Ok(error_response(&err)),

                    Ok(Ok(transformed_image)) => transformed_image,
                };

            let mut res_headers = HeaderMap::new();
            res_headers.insert(
                header::CONTENT_TYPE,
                transformed_image
                    .format
                    .media_type()
                    .to_string()
                    .parse()
                    .expect("Must parse a header value"),
            );
            res_headers.insert(
                header::CONTENT_LENGTH,
                transformed_image.bytes.len().into(),
            );

            let mut res = Response::new(Full::from(Bytes::from(transformed_image.bytes)));
            *res.headers_mut() = res_headers;

            Ok(res)
        })
    }
}

pub(crate) fn response_with_status<B>(status_code: StatusCode) -> Response<B>
where
    B: Default,
{
    let mut res = Response::default();
    *res.status_mut() = status_code;
    res
}

fn error_response(err: &Error) -> Response<Full<Bytes>> {
    let mut res = Response::new(Full::from(err.to_string()));
    *res.status_mut() = err.status_code();
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

#[instrument(skip_all, fields(len = image_bytes.len(), spec = %spec), err)]
fn transform_image(image_bytes: &[u8], spec: &TransformSpec) -> Result<EncodedImage, Error> {
    let image = decode(image_bytes)?;
    process(image, spec)
}
