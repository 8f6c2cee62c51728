//! Serializing a transformed image into its output format.
use std::{
    borrow::Cow,
    io::{BufWriter, Cursor},
};

use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageError};
use tracing::instrument;

use crate::format::OutputFormat;

/// JPEG quality used when the request does not name one.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Errors produced while encoding.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The requested format is not one the encoder can produce.
    #[error("unsupported format `{0}`")]
    UnsupportedFormat(String),

    /// The underlying codec failed.
    #[error(transparent)]
    Codec(#[from] ImageError),
}

/// Encoded image bytes and the format they were written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Encoded bytes.
    pub bytes: Vec<u8>,

    /// Format of `bytes`.
    pub format: OutputFormat,
}

impl EncodedImage {
    /// File extension matching [`EncodedImage::format`], without a dot.
    pub const fn extension(&self) -> &'static str {
        self.format.extension()
    }
}

/// Encode `image` as `format` (`jpeg`, `jpg`, `png`; empty means JPEG).
///
/// `compress` sets the JPEG quality, defaulting to [`DEFAULT_JPEG_QUALITY`].
/// Values outside 1 to 100 are clamped into that range. PNG output is
/// lossless and ignores `compress`.
///
/// # Example
///
/// ```rust
/// use image::DynamicImage;
/// use image_xform_pipeline::encode::encode;
///
/// let encoded = encode(&DynamicImage::new_rgba8(8, 8), "png", None)?;
/// assert_eq!(encoded.extension(), "png");
/// assert!(encode(&DynamicImage::new_rgba8(8, 8), "bmp", None).is_err());
/// # Ok::<(), image_xform_pipeline::encode::EncodeError>(())
/// ```
#[instrument(skip(image), fields(width = image.width(), height = image.height()), err)]
pub fn encode(
    image: &DynamicImage,
    format: &str,
    compress: Option<i32>,
) -> Result<EncodedImage, EncodeError> {
    let format: OutputFormat = format.parse()?;

    let mut writer = BufWriter::new(Cursor::new(Vec::with_capacity(image.as_bytes().len())));

    match format {
        OutputFormat::Jpeg => {
            let quality = jpeg_quality(compress);
            let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            jpeg_compatible(image).write_with_encoder(encoder)?;
        }

        OutputFormat::Png => {
            if compress.is_some() {
                tracing::debug!("ignoring compress for lossless output");
            }
            image.write_to(&mut writer, format.image_format())?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| EncodeError::Codec(ImageError::IoError(err.into_error())))?
        .into_inner();

    Ok(EncodedImage { bytes, format })
}

fn jpeg_quality(compress: Option<i32>) -> u8 {
    let Some(requested) = compress else {
        return DEFAULT_JPEG_QUALITY;
    };

    let quality = requested.clamp(1, 100);
    if quality != requested {
        tracing::warn!(requested, quality, "JPEG quality out of range, clamping");
    }

    quality as u8
}

/// JPEG carries neither alpha nor more than 8 bits per channel.
fn jpeg_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => Cow::Borrowed(image),
        _ if !image.color().has_color() => Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8())),
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    }
}
