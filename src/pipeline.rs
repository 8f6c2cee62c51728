//! The transform pipeline.
//!
//! [`apply`] runs the steps of a [`TransformSpec`] in a fixed order:
//!
//! 1. resize
//! 2. crop
//! 3. rotate
//! 4. flip (vertical)
//! 5. mirror (horizontal)
//! 6. filter
//! 7. watermark
//!
//! A step runs only when its field is present (or, for `flip` and `mirror`,
//! set). The order is never changed based on content: cropping after a resize
//! addresses the resized pixels.
use image::{
    imageops, DynamicImage, GenericImageView, GrayAlphaImage, GrayImage, Luma, LumaA, Rgba,
    RgbaImage,
};
use tracing::instrument;

use crate::transform_spec::{Crop, Filter, Resize, TransformSpec, Watermark};

/// Largest accepted resize target side, in pixels.
pub const MAX_RESIZE_SIDE: u32 = 16_384;

/// Largest accepted resize target area, in pixels.
pub const MAX_RESIZE_PIXELS: u64 = 40_000_000;

const WATERMARK_WIDTH: u32 = 400;
const WATERMARK_HEIGHT: u32 = 50;
const WATERMARK_COLOR: Rgba<u8> = Rgba([255, 255, 255, 100]);

const SEPIA_CONTRAST: f64 = 10.0;
const SEPIA_GAMMA: f64 = 0.9;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Reasons the pipeline refuses a spec.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TransformError {
    /// A crop size was zero or negative, or a resize target was zero,
    /// negative or larger than [`MAX_RESIZE_SIDE`] / [`MAX_RESIZE_PIXELS`].
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: i32,
        /// Requested height.
        height: i32,
    },

    /// The crop rectangle is not contained in the image.
    #[error(
        "crop rectangle at ({}, {}) of {}x{} exceeds image bounds {image_width}x{image_height}",
        .rect.x, .rect.y, .rect.width, .rect.height
    )]
    CropOutOfBounds {
        /// Requested rectangle.
        rect: Crop,
        /// Width of the image being cropped.
        image_width: u32,
        /// Height of the image being cropped.
        image_height: u32,
    },

    /// The rotation angle was NaN or infinite.
    #[error("invalid rotation angle {0}")]
    InvalidAngle(f64),
}

/// Apply every transformation named by `spec` to `source`.
///
/// The first failing step aborts the pipeline and its error is returned; no
/// partially transformed image escapes.
///
/// # Example
///
/// ```rust
/// use image::DynamicImage;
/// use image_xform_pipeline::{pipeline, transform_spec::Resize, TransformSpec};
///
/// let spec = TransformSpec {
///     resize: Some(Resize { width: 64, height: 32 }),
///     mirror: true,
///     ..Default::default()
/// };
///
/// let image = pipeline::apply(DynamicImage::new_rgb8(500, 500), &spec)?;
/// assert_eq!((image.width(), image.height()), (64, 32));
/// # Ok::<(), image_xform_pipeline::pipeline::TransformError>(())
/// ```
#[instrument(
    skip_all,
    fields(width = source.width(), height = source.height(), spec = %spec),
    err
)]
pub fn apply(source: DynamicImage, spec: &TransformSpec) -> Result<DynamicImage, TransformError> {
    let mut image = source;

    if let Some(target) = spec.resize {
        image = resize(image, target)?;
    }

    if let Some(rect) = spec.crop {
        image = crop(image, rect)?;
    }

    if let Some(angle) = spec.rotate {
        image = rotate(image, angle)?;
    }

    if spec.flip {
        tracing::debug!("flipping vertically");
        image = image.flipv();
    }

    if spec.mirror {
        tracing::debug!("mirroring horizontally");
        image = image.fliph();
    }

    image = filter(image, spec.filter);

    if let Some(placement) = spec.watermark {
        image = watermark(image, placement);
    }

    Ok(image)
}

fn positive(value: i32) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v > 0)
}

fn resize(image: DynamicImage, target: Resize) -> Result<DynamicImage, TransformError> {
    let invalid = || TransformError::InvalidDimensions {
        width: target.width,
        height: target.height,
    };

    let (Some(width), Some(height)) = (positive(target.width), positive(target.height)) else {
        return Err(invalid());
    };

    // Resampling allocates the full target up front; an oversized target
    // must be refused rather than left to abort on allocation failure.
    if width > MAX_RESIZE_SIDE
        || height > MAX_RESIZE_SIDE
        || u64::from(width) * u64::from(height) > MAX_RESIZE_PIXELS
    {
        return Err(invalid());
    }

    tracing::debug!(width, height, "resizing");
    Ok(image.resize_exact(width, height, imageops::FilterType::Lanczos3))
}

fn crop(image: DynamicImage, rect: Crop) -> Result<DynamicImage, TransformError> {
    let (Some(width), Some(height)) = (positive(rect.width), positive(rect.height)) else {
        return Err(TransformError::InvalidDimensions {
            width: rect.width,
            height: rect.height,
        });
    };

    let (image_width, image_height) = image.dimensions();
    let out_of_bounds = || TransformError::CropOutOfBounds {
        rect,
        image_width,
        image_height,
    };

    let (Ok(x), Ok(y)) = (u32::try_from(rect.x), u32::try_from(rect.y)) else {
        return Err(out_of_bounds());
    };

    if u64::from(x) + u64::from(width) > u64::from(image_width)
        || u64::from(y) + u64::from(height) > u64::from(image_height)
    {
        return Err(out_of_bounds());
    }

    tracing::debug!(x, y, width, height, "cropping");
    Ok(image.crop_imm(x, y, width, height))
}

fn rotate(image: DynamicImage, angle: f64) -> Result<DynamicImage, TransformError> {
    if !angle.is_finite() {
        return Err(TransformError::InvalidAngle(angle));
    }

    tracing::debug!(angle, "rotating");

    let source = image.into_rgba8();
    let turns = angle.rem_euclid(360.0);

    // Quarter turns are exact; positive angles are counter-clockwise.
    let rotated = if turns == 0.0 {
        source
    } else if turns == 90.0 {
        imageops::rotate270(&source)
    } else if turns == 180.0 {
        imageops::rotate180(&source)
    } else if turns == 270.0 {
        imageops::rotate90(&source)
    } else {
        rotate_about_center(&source, turns)
    };

    Ok(DynamicImage::ImageRgba8(rotated))
}

fn rotate_point(x: f64, y: f64, sin: f64, cos: f64) -> (f64, f64) {
    (x * cos - y * sin, x * sin + y * cos)
}

/// Size of the canvas that holds a `width`x`height` image rotated by the
/// angle whose sine and cosine are given.
fn rotated_bounds(width: u32, height: u32, sin: f64, cos: f64) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (0, 0);
    }

    let (w, h) = (f64::from(width - 1), f64::from(height - 1));
    let corners = [
        (0.0, 0.0),
        rotate_point(w, 0.0, sin, cos),
        rotate_point(w, h, sin, cos),
        rotate_point(0.0, h, sin, cos),
    ];

    let (min_x, max_x, min_y, max_y) = corners.iter().fold(
        (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
        |(min_x, max_x, min_y, max_y), &(x, y)| {
            (min_x.min(x), max_x.max(x), min_y.min(y), max_y.max(y))
        },
    );

    let span = |extent: f64| {
        let extent = extent + 1.0;
        // Round up unless the corner lands within a tenth of a pixel.
        if extent.fract() > 0.1 {
            extent as u32 + 1
        } else {
            extent as u32
        }
    };

    (span(max_x - min_x), span(max_y - min_y))
}

fn rotate_about_center(source: &RgbaImage, angle: f64) -> RgbaImage {
    let (src_w, src_h) = source.dimensions();
    let (sin, cos) = angle.to_radians().sin_cos();
    let (dst_w, dst_h) = rotated_bounds(src_w, src_h, sin, cos);

    let src_off = (f64::from(src_w) / 2.0 - 0.5, f64::from(src_h) / 2.0 - 0.5);
    let dst_off = (f64::from(dst_w) / 2.0 - 0.5, f64::from(dst_h) / 2.0 - 0.5);

    RgbaImage::from_fn(dst_w, dst_h, |x, y| {
        let (sx, sy) = rotate_point(
            f64::from(x) - dst_off.0,
            f64::from(y) - dst_off.1,
            sin,
            cos,
        );
        sample_bilinear(source, sx + src_off.0, sy + src_off.1)
    })
}

fn clamp_channel(value: f64) -> u8 {
    (value.clamp(0.0, 255.0) + 0.5) as u8
}

/// Bilinear sample of `source` at `(x, y)`, treating everything outside the
/// image as transparent. Channels are weighted by alpha so transparent
/// neighbors do not darken edges.
fn sample_bilinear(source: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (x0, y0) = (x.floor(), y.floor());
    let (width, height) = (f64::from(source.width()), f64::from(source.height()));

    if x0 < -1.0 || y0 < -1.0 || x0 >= width || y0 >= height {
        return TRANSPARENT;
    }

    let (xq, yq) = (x - x0, y - y0);
    let taps = [
        (x0, y0, (1.0 - xq) * (1.0 - yq)),
        (x0 + 1.0, y0, xq * (1.0 - yq)),
        (x0, y0 + 1.0, (1.0 - xq) * yq),
        (x0 + 1.0, y0 + 1.0, xq * yq),
    ];

    let mut acc = [0.0f64; 4];
    for (px, py, weight) in taps {
        let pixel = if px >= 0.0 && py >= 0.0 && px < width && py < height {
            *source.get_pixel(px as u32, py as u32)
        } else {
            TRANSPARENT
        };

        let wa = f64::from(pixel[3]) * weight;
        for (sum, channel) in acc.iter_mut().zip(pixel.0.iter().take(3)) {
            *sum += f64::from(*channel) * wa;
        }
        acc[3] += wa;
    }

    if acc[3] == 0.0 {
        return TRANSPARENT;
    }

    let inv = 1.0 / acc[3];
    Rgba([
        clamp_channel(acc[0] * inv),
        clamp_channel(acc[1] * inv),
        clamp_channel(acc[2] * inv),
        clamp_channel(acc[3]),
    ])
}

fn filter(image: DynamicImage, filter: Filter) -> DynamicImage {
    match filter {
        Filter::None => image,
        Filter::Grayscale => {
            tracing::debug!("applying grayscale filter");
            grayscale(&image)
        }
        Filter::Sepia => {
            tracing::debug!("applying sepia filter");
            sepia(image)
        }
    }
}

fn luma(Rgba([r, g, b, _]): Rgba<u8>) -> u8 {
    clamp_channel(0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b))
}

/// Desaturate with BT.601 luma weights, keeping alpha if the image has it.
fn grayscale(image: &DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();

    if image.color().has_alpha() {
        DynamicImage::ImageLumaA8(GrayAlphaImage::from_fn(width, height, |x, y| {
            let pixel = image.get_pixel(x, y);
            LumaA([luma(pixel), pixel[3]])
        }))
    } else {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            Luma([luma(image.get_pixel(x, y))])
        }))
    }
}

/// Lookup table matching a contrast adjustment of `percentage` (-100 to 100).
fn contrast_lut(percentage: f64) -> [u8; 256] {
    let v = (100.0 + percentage.clamp(-100.0, 100.0)) / 100.0;
    std::array::from_fn(|i| {
        let level = i as f64 / 255.0;
        if (0.0..=1.0).contains(&v) {
            clamp_channel((0.5 + (level - 0.5) * v) * 255.0)
        } else if v < 2.0 {
            clamp_channel((0.5 + (level - 0.5) / (2.0 - v)) * 255.0)
        } else if level < 0.5 {
            0
        } else {
            255
        }
    })
}

fn gamma_lut(gamma: f64) -> [u8; 256] {
    let exponent = 1.0 / gamma;
    std::array::from_fn(|i| clamp_channel((i as f64 / 255.0).powf(exponent) * 255.0))
}

/// Fully desaturate (to HSL lightness), then boost contrast and darken the
/// midtones. Alpha is preserved.
fn sepia(image: DynamicImage) -> DynamicImage {
    let had_alpha = image.color().has_alpha();
    let mut pixels = image.into_rgba8();

    let contrast = contrast_lut(SEPIA_CONTRAST);
    let gamma = gamma_lut(SEPIA_GAMMA);

    for pixel in pixels.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        let lightness = (u16::from(r.max(g).max(b)) + u16::from(r.min(g).min(b))) as f64 / 2.0;
        let level = gamma[usize::from(contrast[usize::from(clamp_channel(lightness))])];
        pixel.0[..3].fill(level);
    }

    let image = DynamicImage::ImageRgba8(pixels);
    if had_alpha {
        image
    } else {
        DynamicImage::ImageRgb8(image.into_rgb8())
    }
}

fn watermark(image: DynamicImage, placement: Watermark) -> DynamicImage {
    tracing::debug!(x = placement.x, y = placement.y, "compositing watermark");

    let mut canvas = image.into_rgba8();
    let mark = RgbaImage::from_pixel(WATERMARK_WIDTH, WATERMARK_HEIGHT, WATERMARK_COLOR);

    // `overlay` blends "over" and clips whatever falls outside the canvas.
    imageops::overlay(
        &mut canvas,
        &mark,
        i64::from(placement.x),
        i64::from(placement.y),
    );

    DynamicImage::ImageRgba8(canvas)
}
