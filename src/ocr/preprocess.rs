//! Convert bitmaps into the tensor layout the line recognizer expects.

use image::{
    GrayImage,
    imageops::{self, FilterType},
};
use ndarray::Array4;

use crate::prelude::*;

/// Every line is scaled to exactly this many rows.
pub const TARGET_HEIGHT: u32 = 64;

/// A `(batch=1, channel=1, height=64, width=W)` tensor of samples in
/// `[0.0, 1.0]`.
#[derive(Clone, Debug)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    /// Width of the tensor, in samples.
    pub fn width(&self) -> usize {
        self.0.shape()[3]
    }

    /// Height of the tensor. Always [`TARGET_HEIGHT`].
    pub fn height(&self) -> usize {
        self.0.shape()[2]
    }

    /// The underlying array.
    pub fn as_array(&self) -> &Array4<f32> {
        &self.0
    }
}

/// Width after scaling a `width` x `height` image to [`TARGET_HEIGHT`] rows,
/// keeping the aspect ratio. Never less than 1.
pub fn target_width(width: u32, height: u32) -> u32 {
    let scaled =
        (f64::from(width) * f64::from(TARGET_HEIGHT) / f64::from(height)).round();
    (scaled as u32).max(1)
}

/// Normalize any bitmap. Returns `None` for an empty bitmap.
pub fn normalize(bitmap: &DynamicImage) -> Option<NormalizedTensor> {
    normalize_gray(&bitmap.to_luma8())
}

/// Normalize a grayscale bitmap. Returns `None` for an empty bitmap.
pub fn normalize_gray(gray: &GrayImage) -> Option<NormalizedTensor> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    // Triangle is bilinear: non-negative weights, so no ringing around thin
    // strokes.
    let new_width = target_width(width, height);
    let resized = imageops::resize(gray, new_width, TARGET_HEIGHT, FilterType::Triangle);

    let max = f32::from(u8::MAX);
    let tensor = Array4::from_shape_fn(
        (1, 1, TARGET_HEIGHT as usize, new_width as usize),
        |(_, _, y, x)| f32::from(resized.get_pixel(x as u32, y as u32)[0]) / max,
    );
    Some(NormalizedTensor(tensor))
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb, RgbImage};

    use super::*;

    #[test]
    fn keeps_aspect_ratio_at_fixed_height() {
        let tensor = normalize_gray(&GrayImage::new(128, 32)).unwrap();
        assert_eq!(tensor.as_array().shape(), &[1, 1, 64, 256]);

        let tensor = normalize_gray(&GrayImage::new(100, 30)).unwrap();
        assert_eq!(tensor.height(), 64);
        // 64 * 100 / 30 = 213.33
        assert_eq!(tensor.width(), 213);
    }

    #[test]
    fn width_never_drops_below_one() {
        assert_eq!(target_width(1, 1000), 1);
        let tensor = normalize_gray(&GrayImage::new(1, 1000)).unwrap();
        assert_eq!(tensor.width(), 1);
    }

    #[test]
    fn empty_bitmaps_are_rejected() {
        assert!(normalize_gray(&GrayImage::new(10, 0)).is_none());
        assert!(normalize_gray(&GrayImage::new(0, 10)).is_none());
    }

    #[test]
    fn samples_are_scaled_into_unit_range() {
        let mut gray = GrayImage::from_pixel(40, 20, Luma([255]));
        for x in 10..30 {
            for y in 5..15 {
                gray.put_pixel(x, y, Luma([0]));
            }
        }
        let tensor = normalize_gray(&gray).unwrap();
        let values = tensor.as_array();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        // Corners stay white, the middle of the ink block stays black.
        assert_eq!(values[[0, 0, 0, 0]], 1.0);
        assert_eq!(values[[0, 0, 32, 64]], 0.0);
    }

    #[test]
    fn color_bitmaps_are_converted_to_grayscale() {
        let rgb = RgbImage::from_pixel(64, 32, Rgb([255, 255, 255]));
        let tensor = normalize(&DynamicImage::ImageRgb8(rgb)).unwrap();
        assert_eq!(tensor.as_array().shape(), &[1, 1, 64, 128]);
        assert!(tensor.as_array().iter().all(|&v| v == 1.0));
    }
}
