//! End-to-end tests over the public pipeline API

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use fundus_core::{
    Error, ExplainOptions, FundusNet, FundusNetConfig, IdentifyPipeline, InferenceBridge,
    LabelCatalog,
};
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbImage};
use std::sync::Arc;

const IMAGE_SIZE: usize = 32;

fn odir_test_config() -> FundusNetConfig {
    FundusNetConfig {
        image_size: IMAGE_SIZE,
        block_channels: vec![4, 8],
        num_classes: 37,
    }
}

fn random_pipeline() -> IdentifyPipeline {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = FundusNet::new(vb, &odir_test_config()).unwrap();
    IdentifyPipeline::new(model, LabelCatalog::odir(), &Device::Cpu).unwrap()
}

fn zero_pipeline() -> IdentifyPipeline {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let model = FundusNet::new(vb, &odir_test_config()).unwrap();
    IdentifyPipeline::new(model, LabelCatalog::odir(), &Device::Cpu).unwrap()
}

fn png(rgb: &RgbImage) -> Vec<u8> {
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

fn black_image() -> Vec<u8> {
    png(&RgbImage::new(IMAGE_SIZE as u32, IMAGE_SIZE as u32))
}

fn fundus_like_image() -> Vec<u8> {
    // Bright disc on a dark background, vaguely retina-shaped
    let rgb = RgbImage::from_fn(64, 64, |x, y| {
        let dx = x as i32 - 32;
        let dy = y as i32 - 32;
        if dx * dx + dy * dy < 24 * 24 {
            image::Rgb([180, 90, 40])
        } else {
            image::Rgb([10, 5, 5])
        }
    });
    png(&rgb)
}

#[test]
fn threshold_zero_returns_full_catalog_sorted() {
    let pipeline = random_pipeline();
    let results = pipeline.identify_bytes(&fundus_like_image(), 0.0).unwrap();
    assert_eq!(results.len(), 37);
    for window in results.windows(2) {
        assert!(window[0].probability >= window[1].probability);
    }
}

#[test]
fn below_threshold_falls_back_to_single_argmax() {
    // Zero weights give sigmoid(0) = 0.5 everywhere; a threshold above that
    // forces the fallback path.
    let pipeline = zero_pipeline();
    let results = pipeline.identify_bytes(&black_image(), 0.9).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].probability, 0.5);
    // Tie across all classes: lowest ordinal wins.
    assert_eq!(results[0].label.index, 0);
}

#[test]
fn default_threshold_keeps_qualifying_labels() {
    let pipeline = zero_pipeline();
    let results = pipeline.identify_bytes(&black_image(), 0.1).unwrap();
    assert_eq!(results.len(), 37);
}

#[test]
fn results_are_deterministic_per_input() {
    let pipeline = random_pipeline();
    let bytes = fundus_like_image();
    let a = pipeline.identify_bytes(&bytes, 0.0).unwrap();
    let b = pipeline.identify_bytes(&bytes, 0.0).unwrap();
    assert_eq!(a, b);
}

#[test]
fn malformed_bytes_surface_decode_error() {
    let pipeline = random_pipeline();
    let err = pipeline.identify_bytes(b"\xff\xfenot an image", 0.1).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn explain_produces_decodable_overlay_at_input_resolution() {
    let pipeline = random_pipeline();
    let overlay = pipeline
        .explain_bytes(&fundus_like_image(), &ExplainOptions::default())
        .unwrap();
    let decoded = image::load_from_memory(&overlay).unwrap();
    assert_eq!(decoded.width() as usize, IMAGE_SIZE);
    assert_eq!(decoded.height() as usize, IMAGE_SIZE);
}

#[test]
fn explain_accepts_explicit_target_and_layer() {
    let pipeline = random_pipeline();
    let options = ExplainOptions {
        target_class: Some(19), // normal fundus
        layer: Some("block1".to_string()),
        opacity: 0.4,
    };
    pipeline.explain_bytes(&fundus_like_image(), &options).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bridged_identification_matches_synchronous() {
    let pipeline = Arc::new(random_pipeline());
    let bridge = InferenceBridge::new(Arc::clone(&pipeline), 4, 64);
    let bytes = fundus_like_image();
    let expected = pipeline.identify_bytes(&bytes, 0.1).unwrap();

    let pending: Vec<_> = (0..16)
        .map(|_| bridge.submit(bytes.clone(), 0.1).unwrap())
        .collect();
    for handle in pending {
        assert_eq!(handle.join().await.unwrap(), expected);
    }
}
