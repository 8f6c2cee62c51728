//! Output formats the encoder can produce, along with their media types and
//! file extensions.
use std::str::FromStr;

use image::ImageFormat;
use mediatype::{names, MediaType};

use crate::encode::EncodeError;

const IMAGE_JPEG: MediaType = image_type(names::JPEG);
const IMAGE_PNG: MediaType = image_type(names::PNG);

const fn image_type(subtype: mediatype::Name) -> MediaType {
    MediaType::new(names::IMAGE, subtype)
}

/// Encoded output format.
///
/// An empty format name selects [`OutputFormat::Jpeg`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossy JPEG, quality controlled by `compress`.
    #[default]
    Jpeg,

    /// Lossless PNG; `compress` is ignored.
    Png,
}

impl OutputFormat {
    /// Image format, such as "Png".
    pub const fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
        }
    }

    /// Media type, such as "image/png".
    pub const fn media_type(self) -> MediaType<'static> {
        match self {
            Self::Jpeg => IMAGE_JPEG,
            Self::Png => IMAGE_PNG,
        }
    }

    /// File extension callers should give the encoded bytes, without a dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = EncodeError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            _ => Err(EncodeError::UnsupportedFormat(name.to_owned())),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_defaults_to_jpeg() {
        assert_eq!("".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
    }

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("Png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
    }

    #[test]
    fn unknown_name_is_unsupported() {
        let err = "bmp".parse::<OutputFormat>().unwrap_err();
        assert!(matches!(err, EncodeError::UnsupportedFormat(name) if name == "bmp"));
    }

    #[test]
    fn media_types() {
        assert_eq!(OutputFormat::Png.media_type().to_string(), "image/png");
        assert_eq!(OutputFormat::Jpeg.media_type().to_string(), "image/jpeg");
    }
}
