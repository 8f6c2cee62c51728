//! Decoding source bytes with the codecs `image` provides.
use std::io::Cursor;

use image::{DynamicImage, ImageError, ImageReader};
use tracing::instrument;

/// Errors produced while decoding a source image.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Reading the source failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The bytes are not an image in a format the codecs understand.
    #[error(transparent)]
    Codec(#[from] ImageError),
}

/// Decode `bytes`, guessing the format from their contents.
#[instrument(skip_all, fields(len = bytes.len()), err)]
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;

    tracing::debug!(format = ?reader.format(), "decoding source image");
    Ok(reader.decode()?)
}
