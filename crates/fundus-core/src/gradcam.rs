//! Grad-CAM visual explanations for the fundus classifier
//!
//! Given a preprocessed image and a target class, this module computes the
//! gradient of that class's probability with respect to a conv block's
//! feature map, averages it spatially into per-channel weights, and renders
//! the weighted channel sum as a color heatmap blended over the input image.
//!
//! The forward pass re-enters the network at the target block through a
//! `candle_core::Var`, which is the only differentiable leaf in the graph:
//! `backward()` on the class score then yields exactly the feature-map
//! gradient Grad-CAM needs, without touching the frozen weights.

use candle_core::{IndexOp, Tensor, Var};
use image::imageops::FilterType;
use image::{ImageBuffer, Luma, Rgb, RgbImage};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::FundusNet;
use crate::preprocess::tensor_to_rgb;

/// Default heatmap opacity when the caller supplies none
pub const DEFAULT_OPACITY: f32 = 0.4;

/// Options for a single attribution call.
#[derive(Debug, Clone)]
pub struct ExplainOptions {
    /// Class to explain; defaults to the top prediction of this forward pass
    pub target_class: Option<usize>,
    /// Conv block whose feature map is attributed; defaults to the last one
    pub layer: Option<String>,
    /// Heatmap opacity in [0, 1] when compositing over the input
    pub opacity: f32,
}

impl Default for ExplainOptions {
    fn default() -> Self {
        Self {
            target_class: None,
            layer: None,
            opacity: DEFAULT_OPACITY,
        }
    }
}

/// Compute the normalized Grad-CAM map for `target_class` at conv block
/// `block`. Returns a row-major `(h, w)` grid with values in [0, 1], or
/// all zeros when every gradient contribution vanishes.
pub fn heatmap(
    model: &FundusNet,
    input: &Tensor,
    block: usize,
    target_class: Option<usize>,
) -> Result<Vec<Vec<f32>>> {
    // Capture the block's feature map, then rejoin the graph through a
    // variable so the class score is differentiable with respect to it.
    let features = model.forward_to(input, block)?;
    let fvar = Var::from_tensor(&features)?;
    let probs = model.forward_from(fvar.as_tensor(), block)?;

    let probs_vec: Vec<f32> = probs.squeeze(0)?.to_vec1()?;
    let target = resolve_target(&probs_vec, target_class)?;

    let score = probs.i((0, target))?;
    let grads = score.backward()?;
    let grad = grads.get(fvar.as_tensor()).ok_or_else(|| {
        Error::GradientUnavailable(format!(
            "no gradient path from class {target} to conv block {block}"
        ))
    })?;

    // One importance weight per feature channel, then a weighted channel sum.
    let weights = grad.mean(3)?.mean(2)?.unsqueeze(2)?.unsqueeze(3)?;
    let cam = features.broadcast_mul(&weights)?.sum(1)?.squeeze(0)?;

    let raw: Vec<Vec<f32>> = cam.to_vec2()?;
    debug!(
        "Grad-CAM for class {target}: {}x{} map from block {block}",
        raw.len(),
        raw.first().map_or(0, Vec::len)
    );
    Ok(normalize(raw))
}

/// Render a Grad-CAM overlay: heatmap for the requested class, upsampled to
/// the input resolution, jet-colored, and alpha-blended over the image the
/// tensor encodes. The returned image is at model input resolution.
pub fn explain(model: &FundusNet, input: &Tensor, options: &ExplainOptions) -> Result<RgbImage> {
    if !(0.0..=1.0).contains(&options.opacity) {
        return Err(Error::InvalidOpacity(options.opacity));
    }

    let block = match &options.layer {
        Some(name) => model.block_index(name).ok_or_else(|| {
            Error::Configuration(format!(
                "unknown attribution layer {name:?}; expected one of {:?}",
                model.layer_names()
            ))
        })?,
        None => model.last_block(),
    };

    let map = heatmap(model, input, block, options.target_class)?;
    let base = tensor_to_rgb(input)?;
    let upsampled = upsample(&map, base.width(), base.height());

    let overlay = RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let intensity = upsampled.get_pixel(x, y)[0].clamp(0.0, 1.0);
        let heat = jet(intensity);
        let original = base.get_pixel(x, y);
        blend(original, &heat, options.opacity)
    });

    Ok(overlay)
}

/// Encode an overlay image as PNG for transport.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    use image::codecs::png::PngEncoder;
    use image::ImageEncoder;

    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| Error::Inference(format!("failed to encode overlay: {e}")))?;
    Ok(bytes)
}

/// Pick the class to explain: the caller's choice (validated against the
/// output arity) or the arg-max of this forward pass.
fn resolve_target(probabilities: &[f32], requested: Option<usize>) -> Result<usize> {
    match requested {
        Some(index) if index < probabilities.len() => Ok(index),
        Some(index) => Err(Error::Configuration(format!(
            "target class {index} out of range (model has {} outputs)",
            probabilities.len()
        ))),
        None => {
            let mut best = 0;
            for (i, &p) in probabilities.iter().enumerate() {
                if p > probabilities[best] {
                    best = i;
                }
            }
            Ok(best)
        }
    }
}

/// Clamp negative evidence to zero and scale so the maximum is 1.0.
/// An all-zero map is returned unchanged rather than divided by zero.
fn normalize(mut map: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    let mut max = 0.0f32;
    for row in &mut map {
        for v in row.iter_mut() {
            *v = v.max(0.0);
            max = max.max(*v);
        }
    }
    if max > 0.0 {
        for row in &mut map {
            for v in row.iter_mut() {
                *v /= max;
            }
        }
    }
    map
}

/// Bilinear upsample of the heatmap grid to the overlay resolution.
fn upsample(map: &[Vec<f32>], width: u32, height: u32) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let map_h = map.len() as u32;
    let map_w = map.first().map_or(0, Vec::len) as u32;
    let flat: Vec<f32> = map.iter().flatten().copied().collect();
    let small: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(map_w, map_h, flat).unwrap_or_else(|| ImageBuffer::new(1, 1));
    image::imageops::resize(&small, width, height, FilterType::Triangle)
}

/// Jet color ramp: blue (cold) through green to red (hot).
fn jet(t: f32) -> Rgb<u8> {
    let channel = |v: f32| ((1.5 - v.abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    let t = t.clamp(0.0, 1.0) * 4.0;
    Rgb([channel(t - 3.0), channel(t - 2.0), channel(t - 1.0)])
}

/// Alpha-blend the heat color over the original pixel.
fn blend(original: &Rgb<u8>, heat: &Rgb<u8>, opacity: f32) -> Rgb<u8> {
    let mix = |o: u8, h: u8| {
        ((1.0 - opacity) * f32::from(o) + opacity * f32::from(h))
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([
        mix(original[0], heat[0]),
        mix(original[1], heat[1]),
        mix(original[2], heat[2]),
    ])
}
