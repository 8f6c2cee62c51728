use http::StatusCode;

use crate::{
    decode::DecodeError, encode::EncodeError, pipeline::TransformError,
    transform_spec::ParseSpecError,
};

/// Any failure between receiving a request and producing encoded bytes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The compact transform parameters could not be parsed.
    #[error(transparent)]
    Spec(#[from] ParseSpecError),

    /// The source image could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A transform step refused its parameters.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// The result could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl Error {
    /// HTTP status a caller should report for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Spec(_) | Self::Decode(DecodeError::Codec(_)) => StatusCode::BAD_REQUEST,
            Self::Transform(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Encode(EncodeError::UnsupportedFormat(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Decode(DecodeError::Io(_)) | Self::Encode(EncodeError::Codec(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
