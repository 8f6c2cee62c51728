//! The request describing what to do to one image.
//!
//! A [`TransformSpec`] can be deserialized from JSON with `serde`, or parsed
//! from a compact, comma-separated form suitable for a URL path segment:
//!
//! ```text
//! resize_100:100,crop_0:0:50:50,rotate_30,flip,mirror,filter_sepia,watermark_10:10,format_png,compress_80
//! ```
//!
//! Every parameter is optional. Parameters carrying several values separate
//! them with `:`.
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Resample target, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    /// Target width; must be positive.
    pub width: i32,
    /// Target height; must be positive.
    pub height: i32,
}

/// Crop rectangle, relative to the image as it stands after any resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Rectangle width.
    pub width: i32,
    /// Rectangle height.
    pub height: i32,
}

/// Placement of the watermark's top-left corner. May lie partly or wholly
/// outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Horizontal offset.
    pub x: i32,
    /// Vertical offset.
    pub y: i32,
}

/// Color filter applied after the geometric steps.
///
/// Names are matched case-insensitively. Any name other than `grayscale` or
/// `sepia` selects [`Filter::None`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Filter {
    /// Leave colors untouched.
    #[default]
    None,

    /// Fully desaturate.
    Grayscale,

    /// Desaturate, then boost contrast by 10% and apply a gamma of 0.9.
    Sepia,
}

impl Filter {
    /// Canonical name of the filter.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Grayscale => "grayscale",
            Self::Sepia => "sepia",
        }
    }
}

impl From<&str> for Filter {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "grayscale" => Self::Grayscale,
            "sepia" => Self::Sepia,
            _ => Self::None,
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}

/// Transformations to apply to one image, and how to encode the result.
///
/// The pipeline only ever borrows a spec; absence of an optional field is the
/// sole reason a step is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSpec {
    /// Resize to exact dimensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize: Option<Resize>,

    /// Crop to a rectangle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<Crop>,

    /// Rotate counter-clockwise by this many degrees. `Some(0.0)` still runs
    /// the rotation step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotate: Option<f64>,

    /// Flip vertically.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub flip: bool,

    /// Mirror horizontally.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub mirror: bool,

    /// Color filter.
    pub filter: Filter,

    /// Overlay the watermark at this position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<Watermark>,

    /// Output format name, e.g. "png". Empty means JPEG.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// JPEG quality, 1 to 100. `None` means the default quality.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<i32>,
}

/// Error parsing the compact form of a [`TransformSpec`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseSpecError {
    /// The parameter key is not recognized, or a flag was given a value.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    /// A value could not be parsed as a number.
    #[error("invalid number `{value}` for `{key}`")]
    InvalidNumber {
        /// Parameter key.
        key: String,
        /// Offending value.
        value: String,
    },

    /// A parameter was given the wrong number of `:`-separated values.
    #[error("`{key}` takes {expected} values, got {found}")]
    WrongArity {
        /// Parameter key.
        key: String,
        /// Values the key requires.
        expected: usize,
        /// Values given.
        found: usize,
    },
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, ParseSpecError> {
    value.parse().map_err(|_| ParseSpecError::InvalidNumber {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

fn numbers<const N: usize>(key: &str, value: &str) -> Result<[i32; N], ParseSpecError> {
    let parsed = value
        .split(':')
        .map(|v| number(key, v))
        .collect::<Result<Vec<i32>, _>>()?;
    let found = parsed.len();

    parsed.try_into().map_err(|_| ParseSpecError::WrongArity {
        key: key.to_owned(),
        expected: N,
        found,
    })
}

impl FromStr for TransformSpec {
    type Err = ParseSpecError;

    fn from_str(params: &str) -> Result<Self, Self::Err> {
        let mut spec = Self::default();

        for param in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match param.split_once('_') {
                Some((key, value)) => (key, Some(value)),
                None => (param, None),
            };

            match (key, value) {
                ("flip", None) => spec.flip = true,
                ("mirror", None) => spec.mirror = true,
                ("resize", Some(value)) => {
                    let [width, height] = numbers(key, value)?;
                    spec.resize = Some(Resize { width, height });
                }
                ("crop", Some(value)) => {
                    let [x, y, width, height] = numbers(key, value)?;
                    spec.crop = Some(Crop {
                        x,
                        y,
                        width,
                        height,
                    });
                }
                ("rotate", Some(value)) => {
                    let angle: f64 = number(key, value)?;
                    if !angle.is_finite() {
                        return Err(ParseSpecError::InvalidNumber {
                            key: key.to_owned(),
                            value: value.to_owned(),
                        });
                    }
                    spec.rotate = Some(angle);
                }
                ("filter", Some(value)) => spec.filter = Filter::from(value),
                ("watermark", Some(value)) => {
                    let [x, y] = numbers(key, value)?;
                    spec.watermark = Some(Watermark { x, y });
                }
                ("format", Some(value)) => spec.format = value.to_owned(),
                ("compress", Some(value)) => spec.compress = Some(number(key, value)?),
                _ => return Err(ParseSpecError::UnknownParameter(param.to_owned())),
            }
        }

        Ok(spec)
    }
}

impl std::fmt::Display for TransformSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = [
            self.resize
                .map(|r| format!("resize_{}:{}", r.width, r.height)),
            self.crop
                .map(|c| format!("crop_{}:{}:{}:{}", c.x, c.y, c.width, c.height)),
            self.rotate.map(|angle| format!("rotate_{angle}")),
            self.flip.then(|| "flip".to_owned()),
            self.mirror.then(|| "mirror".to_owned()),
            (self.filter != Filter::None).then(|| format!("filter_{}", self.filter)),
            self.watermark
                .map(|w| format!("watermark_{}:{}", w.x, w.y)),
            (!self.format.is_empty()).then(|| format!("format_{}", self.format)),
            self.compress.map(|q| format!("compress_{q}")),
        ];

        let mut params_iter = params.into_iter().flatten();

        if let Some(first_param) = params_iter.next() {
            write!(f, "{}", first_param)?;
            for param in params_iter {
                write!(f, ",{}", param)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_parameter() {
        let spec: TransformSpec = "resize_100:80,crop_1:2:30:40,rotate_-12.5,flip,mirror,\
                                   filter_Sepia,watermark_-5:7,format_png,compress_75"
            .parse()
            .unwrap();

        assert_eq!(
            spec,
            TransformSpec {
                resize: Some(Resize {
                    width: 100,
                    height: 80
                }),
                crop: Some(Crop {
                    x: 1,
                    y: 2,
                    width: 30,
                    height: 40
                }),
                rotate: Some(-12.5),
                flip: true,
                mirror: true,
                filter: Filter::Sepia,
                watermark: Some(Watermark { x: -5, y: 7 }),
                format: "png".to_owned(),
                compress: Some(75),
            }
        );
    }

    #[test]
    fn empty_params_are_the_default_spec() {
        assert_eq!("".parse::<TransformSpec>().unwrap(), TransformSpec::default());
    }

    #[test]
    fn display_is_parseable() {
        let spec: TransformSpec = "resize_10:20,rotate_0,flip,filter_grayscale,format_jpg"
            .parse()
            .unwrap();
        let rendered = spec.to_string();

        assert_eq!(rendered, "resize_10:20,rotate_0,flip,filter_grayscale,format_jpg");
        assert_eq!(rendered.parse::<TransformSpec>().unwrap(), spec);
    }

    #[test]
    fn unknown_filter_is_a_no_op_not_an_error() {
        let spec: TransformSpec = "filter_vintage".parse().unwrap();
        assert_eq!(spec.filter, Filter::None);
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert_eq!(
            "blur_3".parse::<TransformSpec>(),
            Err(ParseSpecError::UnknownParameter("blur_3".to_owned()))
        );
        assert_eq!(
            "flip_yes".parse::<TransformSpec>(),
            Err(ParseSpecError::UnknownParameter("flip_yes".to_owned()))
        );
    }

    #[test]
    fn wrong_value_count_is_rejected() {
        assert_eq!(
            "crop_1:2:3".parse::<TransformSpec>(),
            Err(ParseSpecError::WrongArity {
                key: "crop".to_owned(),
                expected: 4,
                found: 3
            })
        );
    }

    #[test]
    fn non_numeric_and_non_finite_values_are_rejected() {
        assert!(matches!(
            "resize_a:10".parse::<TransformSpec>(),
            Err(ParseSpecError::InvalidNumber { .. })
        ));
        assert!(matches!(
            "rotate_NaN".parse::<TransformSpec>(),
            Err(ParseSpecError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn json_distinguishes_absent_from_zero() {
        let absent: TransformSpec = serde_json::from_str(r#"{"flip": true}"#).unwrap();
        assert_eq!(absent.rotate, None);
        assert_eq!(absent.compress, None);

        let zero: TransformSpec =
            serde_json::from_str(r#"{"rotate": 0, "compress": 0}"#).unwrap();
        assert_eq!(zero.rotate, Some(0.0));
        assert_eq!(zero.compress, Some(0));
    }

    #[test]
    fn json_matches_upload_api_shape() {
        let spec: TransformSpec = serde_json::from_str(
            r#"{
                "resize": {"width": 100, "height": 100},
                "crop": {"x": 0, "y": 0, "width": 50, "height": 50},
                "rotate": 30,
                "watermark": {"x": 10, "y": 10},
                "filter": "GRAYSCALE",
                "format": "png"
            }"#,
        )
        .unwrap();

        assert_eq!(spec.filter, Filter::Grayscale);
        assert_eq!(spec.watermark, Some(Watermark { x: 10, y: 10 }));
        assert_eq!(spec.format, "png");
        assert!(!spec.flip);

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["filter"], "grayscale");
        assert!(value.get("compress").is_none());
    }
}
