//! Image preprocessing for the fundus classifier
//!
//! Decodes JPEG/PNG bytes into the fixed-shape, normalized tensor both the
//! classifier and the attribution engine expect: `(1, 3, S, S)` f32 in
//! [0, 1], RGB channel order. Pure and deterministic; identical bytes always
//! produce identical tensors.

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::Path;

use crate::error::{Error, Result};

/// Default input edge length for the deployed model (224x224 pixels)
pub const DEFAULT_IMAGE_SIZE: usize = 224;

/// Decodes and normalizes images to the classifier's input contract.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    size: usize,
    device: Device,
}

impl ImagePreprocessor {
    /// Create a preprocessor targeting a square `size` x `size` input.
    #[must_use]
    pub fn new(size: usize, device: &Device) -> Self {
        Self {
            size,
            device: device.clone(),
        }
    }

    /// Target edge length
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Decode raw image bytes and produce a `(1, 3, S, S)` tensor in [0, 1].
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<Tensor> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| Error::Decode(format!("unreadable image bytes: {e}")))?;
        self.preprocess_image(&decoded)
    }

    /// Decode an image file and produce a `(1, 3, S, S)` tensor in [0, 1].
    pub fn preprocess_path(&self, path: &Path) -> Result<Tensor> {
        let decoded = image::open(path)
            .map_err(|e| Error::Decode(format!("cannot read {}: {e}", path.display())))?;
        self.preprocess_image(&decoded)
    }

    /// Normalize an already-decoded image.
    ///
    /// The resize stretches to the target square, ignoring aspect ratio.
    /// That matches how the model was trained; cropping or letterboxing here
    /// would shift its input distribution.
    pub fn preprocess_image(&self, image: &DynamicImage) -> Result<Tensor> {
        let rgb = self.resize_rgb(image);
        let tensor = rgb_to_tensor(&rgb, &self.device)?;
        Ok(tensor)
    }

    /// Stretch-resize to the target square and convert to RGB.
    #[must_use]
    pub fn resize_rgb(&self, image: &DynamicImage) -> RgbImage {
        image
            .resize_exact(self.size as u32, self.size as u32, FilterType::Triangle)
            .to_rgb8()
    }
}

/// Convert an RGB image to a `(1, 3, H, W)` tensor with values in [0, 1].
pub fn rgb_to_tensor(rgb: &RgbImage, device: &Device) -> Result<Tensor> {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let mut data = Vec::with_capacity(3 * width * height);

    // HWC -> CHW
    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                data.push(f32::from(pixel[c]) / 255.0);
            }
        }
    }

    let tensor = Tensor::from_vec(data, (1, 3, height, width), device)?;
    Ok(tensor)
}

/// Reconstruct the u8 RGB image a `(1, 3, H, W)` tensor in [0, 1] encodes.
///
/// Exact round-trip for tensors produced by [`rgb_to_tensor`]: scaling by
/// 255 and rounding recovers the original pixel values.
pub fn tensor_to_rgb(tensor: &Tensor) -> Result<RgbImage> {
    let (_, channels, height, width) = tensor.dims4()?;
    if channels != 3 {
        return Err(Error::Inference(format!(
            "expected 3-channel tensor, got {channels}"
        )));
    }

    let planes: Vec<Vec<Vec<f32>>> = tensor.squeeze(0)?.to_vec3()?;
    let mut rgb = RgbImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let pixel = [
                (planes[0][y][x] * 255.0).round().clamp(0.0, 255.0) as u8,
                (planes[1][y][x] * 255.0).round().clamp(0.0, 255.0) as u8,
                (planes[2][y][x] * 255.0).round().clamp(0.0, 255.0) as u8,
            ];
            rgb.put_pixel(x as u32, y as u32, image::Rgb(pixel));
        }
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::PngEncoder;
    use image::ImageEncoder;

    fn encode_png(rgb: &RgbImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
            .unwrap();
        bytes
    }

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_output_shape() {
        let pre = ImagePreprocessor::new(64, &Device::Cpu);
        let bytes = encode_png(&gradient_image(100, 40));
        let tensor = pre.preprocess_bytes(&bytes).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 64, 64]);
    }

    #[test]
    fn test_values_in_unit_range() {
        let pre = ImagePreprocessor::new(32, &Device::Cpu);
        let bytes = encode_png(&gradient_image(32, 32));
        let tensor = pre.preprocess_bytes(&bytes).unwrap();
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_deterministic_on_identical_bytes() {
        let pre = ImagePreprocessor::new(48, &Device::Cpu);
        let bytes = encode_png(&gradient_image(80, 60));
        let a: Vec<f32> = pre
            .preprocess_bytes(&bytes)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        let b: Vec<f32> = pre
            .preprocess_bytes(&bytes)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_bytes_decode_error() {
        let pre = ImagePreprocessor::new(64, &Device::Cpu);
        let err = pre.preprocess_bytes(b"this is not an image").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_tensor_rgb_round_trip() {
        let rgb = gradient_image(16, 16);
        let tensor = rgb_to_tensor(&rgb, &Device::Cpu).unwrap();
        let back = tensor_to_rgb(&tensor).unwrap();
        assert_eq!(rgb, back);
    }
}
