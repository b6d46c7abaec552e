//! Stage-specific image → tensor transforms.
//!
//! Two fixed pipelines, both producing a `(1, 3, 224, 224)` CHW tensor:
//! - `Normalized` (stages 1, 2, 4): resize to 224×224, scale to [0,1],
//!   apply the ImageNet per-channel mean/std.
//! - `CenterCrop` (stage 3): resize the short side to 256 keeping aspect
//!   ratio, center-crop 224×224, scale to [0,1]. No mean/std is applied;
//!   the stage-3 model was trained on unnormalized input.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::io::Reader as ImageReader;
use image::{DynamicImage, RgbImage};
use ndarray::{Array4, ArrayD};
use thiserror::Error;

/// ImageNet channel means (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Side of the square tensor every image stage consumes.
pub const INPUT_SIZE: u32 = 224;
/// Short-side length before the stage-3 center crop.
pub const SUBTYPE_RESIZE: u32 = 256;

/// Largest pixel count decoded or produced by a resize. Byte size is
/// bounded separately by the upload limit.
pub const MAX_IMAGE_PIXELS: u64 = 89_478_485;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Image is empty")]
    Empty,

    #[error("Image of {width}x{height} exceeds {} pixels", MAX_IMAGE_PIXELS)]
    TooLarge { width: u64, height: u64 },

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Image has zero width or height")]
    ZeroSized,
}

/// Decode uploaded bytes and convert to three-channel RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, TransformError> {
    if bytes.is_empty() {
        return Err(TransformError::Empty);
    }
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| TransformError::Decode(e.to_string()))?;
    check_pixel_budget(width as u64, height as u64)?;

    let image: DynamicImage =
        image::load_from_memory(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;
    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(TransformError::ZeroSized);
    }
    Ok(rgb)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTransform {
    Normalized,
    CenterCrop,
}

impl ImageTransform {
    pub fn apply(&self, image: &RgbImage) -> Result<ArrayD<f32>, TransformError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(TransformError::ZeroSized);
        }
        let tensor = match self {
            ImageTransform::Normalized => {
                let resized =
                    imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
                to_tensor(&resized, Some((&IMAGENET_MEAN, &IMAGENET_STD)))
            }
            ImageTransform::CenterCrop => {
                let (w, h) =
                    short_side_dimensions(image.width(), image.height(), SUBTYPE_RESIZE)?;
                let resized = imageops::resize(image, w, h, FilterType::Triangle);
                let (left, top) = center_crop_offsets(w, h, INPUT_SIZE);
                let cropped =
                    imageops::crop_imm(&resized, left, top, INPUT_SIZE, INPUT_SIZE).to_image();
                to_tensor(&cropped, None)
            }
        };
        Ok(tensor.into_dyn())
    }
}

/// Reject dimensions whose pixel count is over `MAX_IMAGE_PIXELS`.
pub fn check_pixel_budget(width: u64, height: u64) -> Result<(), TransformError> {
    match width.checked_mul(height) {
        Some(pixels) if pixels <= MAX_IMAGE_PIXELS => Ok(()),
        _ => Err(TransformError::TooLarge { width, height }),
    }
}

/// Scale so the shorter side equals `short`; the longer side is truncated.
/// Extreme aspect ratios that would blow the pixel budget are rejected.
pub fn short_side_dimensions(
    width: u32,
    height: u32,
    short: u32,
) -> Result<(u32, u32), TransformError> {
    let (w, h) = (width.max(1) as u64, height.max(1) as u64);
    let short = short as u64;
    let (out_w, out_h) = if w <= h {
        (short, (short * h / w).max(short))
    } else {
        ((short * w / h).max(short), short)
    };
    check_pixel_budget(out_w, out_h)?;
    // Both sides fit in u32 once the product is under the budget.
    Ok((out_w as u32, out_h as u32))
}

/// Top-left corner of a centered `crop × crop` window (rounded).
pub fn center_crop_offsets(width: u32, height: u32, crop: u32) -> (u32, u32) {
    let offset = |side: u32| ((side.saturating_sub(crop)) as f32 / 2.0).round() as u32;
    (offset(width), offset(height))
}

/// HWC u8 → NCHW f32 in [0,1], optionally normalized per channel.
fn to_tensor(image: &RgbImage, normalize: Option<(&[f32; 3], &[f32; 3])>) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
        let value = image.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0;
        match normalize {
            Some((mean, std)) => (value - mean[c]) / std[c],
            None => value,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    fn encode_png(image: RgbImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn subtype_transform_is_unnormalized() {
        let image = solid(500, 300, [255, 0, 128]);
        let tensor = ImageTransform::CenterCrop.apply(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((tensor[[0, 0, 100, 100]] - 1.0).abs() < 1e-3);
        assert!(tensor[[0, 1, 100, 100]].abs() < 1e-3);
        assert!((tensor[[0, 2, 100, 100]] - 128.0 / 255.0).abs() < 1e-2);
    }

    #[test]
    fn normalized_transform_applies_imagenet_stats() {
        let image = solid(500, 300, [255, 0, 128]);
        let tensor = ImageTransform::Normalized.apply(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((tensor[[0, 0, 10, 10]] - red).abs() < 1e-2);
        assert!((tensor[[0, 1, 10, 10]] - green).abs() < 1e-2);
        // Mean subtraction pushes the empty green channel below zero.
        assert!(tensor[[0, 1, 10, 10]] < 0.0);
    }

    #[test]
    fn short_side_resize_keeps_aspect() {
        assert_eq!(short_side_dimensions(500, 300, 256).unwrap(), (426, 256));
        assert_eq!(short_side_dimensions(300, 500, 256).unwrap(), (256, 426));
        assert_eq!(short_side_dimensions(256, 256, 256).unwrap(), (256, 256));
    }

    #[test]
    fn short_side_resize_rejects_extreme_aspect() {
        let err = short_side_dimensions(1, 100_000, 256).unwrap_err();
        assert!(matches!(
            err,
            TransformError::TooLarge {
                width: 256,
                height: 25_600_000
            }
        ));
        assert!(short_side_dimensions(100_000, 1, 256).is_err());
        assert!(short_side_dimensions(u32::MAX, 1, 256).is_err());
    }

    #[test]
    fn thin_image_is_rejected_before_resize() {
        let bytes = encode_png(solid(1, 100_000, [0, 0, 0]));
        let rgb = decode_rgb(&bytes).unwrap();
        assert!(matches!(
            ImageTransform::CenterCrop.apply(&rgb),
            Err(TransformError::TooLarge { .. })
        ));
        // The gate transform squeezes to 224x224 and stays in budget.
        let tensor = ImageTransform::Normalized.apply(&rgb).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn pixel_budget_boundary() {
        assert!(check_pixel_budget(MAX_IMAGE_PIXELS, 1).is_ok());
        assert!(check_pixel_budget(MAX_IMAGE_PIXELS + 1, 1).is_err());
        assert!(check_pixel_budget(u64::MAX, 2).is_err());
        assert!(check_pixel_budget(10_000, 10_000).is_err());
    }

    #[test]
    fn crop_offsets_are_centered() {
        assert_eq!(center_crop_offsets(426, 256, 224), (101, 16));
        assert_eq!(center_crop_offsets(224, 224, 224), (0, 0));
    }

    #[test]
    fn center_crop_takes_middle_region() {
        // Left half black, right half white: the crop straddles the boundary.
        let mut image = solid(600, 300, [0, 0, 0]);
        for x in 300..600 {
            for y in 0..300 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let tensor = ImageTransform::CenterCrop.apply(&image).unwrap();
        assert!(tensor[[0, 0, 112, 5]] < 0.1);
        assert!(tensor[[0, 0, 112, 218]] > 0.9);
    }

    #[test]
    fn decode_converts_to_rgb() {
        let bytes = encode_png(solid(40, 20, [10, 20, 30]));
        let rgb = decode_rgb(&bytes).unwrap();
        assert_eq!((rgb.width(), rgb.height()), (40, 20));
        assert_eq!(rgb.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn decode_rejects_garbage_and_empty() {
        assert!(matches!(decode_rgb(b""), Err(TransformError::Empty)));
        assert!(matches!(
            decode_rgb(b"not an image at all"),
            Err(TransformError::Decode(_))
        ));
    }
}
