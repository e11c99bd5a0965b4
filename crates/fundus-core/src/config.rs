//! Service configuration loading
//!
//! TOML file with optional sections; anything absent falls back to the
//! deployment defaults. A missing file is not an error, but serving requires
//! `[model].weights` to point at the classifier artifact.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::bridge::DEFAULT_QUEUE_DEPTH;
use crate::error::{Error, Result};
use crate::gradcam::DEFAULT_OPACITY;
use crate::preprocess::DEFAULT_IMAGE_SIZE;
use crate::select::DEFAULT_THRESHOLD;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub model: Option<ModelConfig>,
    pub inference: Option<InferenceConfig>,
    pub attribution: Option<AttributionConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ModelConfig {
    /// Path to the safetensors weights artifact
    pub weights: Option<PathBuf>,
    /// Square input edge length in pixels
    pub image_size: Option<usize>,
    /// Conv block targeted by attribution (defaults to the last one)
    pub target_layer: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct InferenceConfig {
    /// Fixed worker count for the inference pool
    pub workers: Option<usize>,
    /// Units accepted beyond the executing ones before overload rejection
    pub queue_depth: Option<usize>,
    /// Confidence threshold used when a request supplies none
    pub default_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AttributionConfig {
    /// Heatmap opacity used when a request supplies none
    pub default_opacity: Option<f32>,
}

impl Config {
    /// Path to the model weights artifact, if configured.
    #[must_use]
    pub fn weights_path(&self) -> Option<PathBuf> {
        self.model.as_ref().and_then(|m| m.weights.clone())
    }

    /// Classifier input edge length (default 224).
    #[must_use]
    pub fn image_size(&self) -> usize {
        self.model
            .as_ref()
            .and_then(|m| m.image_size)
            .unwrap_or(DEFAULT_IMAGE_SIZE)
    }

    /// Attribution target layer, if configured.
    #[must_use]
    pub fn target_layer(&self) -> Option<String> {
        self.model.as_ref().and_then(|m| m.target_layer.clone())
    }

    /// Inference worker count; defaults to the host's available parallelism.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.inference
            .as_ref()
            .and_then(|i| i.workers)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(usize::from)
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Admission queue depth (default 64).
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inference
            .as_ref()
            .and_then(|i| i.queue_depth)
            .unwrap_or(DEFAULT_QUEUE_DEPTH)
    }

    /// Default confidence threshold (0.1).
    #[must_use]
    pub fn default_threshold(&self) -> f32 {
        self.inference
            .as_ref()
            .and_then(|i| i.default_threshold)
            .unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Default overlay opacity (0.4).
    #[must_use]
    pub fn default_opacity(&self) -> f32 {
        self.attribution
            .as_ref()
            .and_then(|a| a.default_opacity)
            .unwrap_or(DEFAULT_OPACITY)
    }
}

/// Load configuration from a TOML file; a missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Configuration(format!("cannot read {}: {e}", path.display())))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| Error::Configuration(format!("invalid config {}: {e}", path.display())))?;
    Ok(config)
}
