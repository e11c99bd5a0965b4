//! Request-scope glue: model + catalog wired into one identification unit
//!
//! An [`IdentifyPipeline`] is constructed once at startup, after the model
//! artifact loads, and shared by reference for the life of the process. The
//! constructor is where model/catalog lockstep is enforced: an output-arity
//! mismatch is a deployment fault and must never surface at request time.

use candle_core::Device;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::LabelCatalog;
use crate::error::{Error, Result};
use crate::gradcam::{self, ExplainOptions};
use crate::model::FundusNet;
use crate::preprocess::ImagePreprocessor;
use crate::select::{self, Prediction};

/// Shared, read-only identification pipeline.
///
/// All methods take `&self` and are safe to call from any number of worker
/// threads concurrently.
#[derive(Debug)]
pub struct IdentifyPipeline {
    model: Arc<FundusNet>,
    catalog: Arc<LabelCatalog>,
    preprocessor: ImagePreprocessor,
}

impl IdentifyPipeline {
    /// Wire a loaded model to its label catalog.
    ///
    /// Fails with a configuration error when the model's output length does
    /// not match the catalog: the two ship in lockstep and a mismatch means
    /// a broken deployment.
    pub fn new(model: FundusNet, catalog: LabelCatalog, device: &Device) -> Result<Self> {
        if model.num_classes() != catalog.len() {
            return Err(Error::Configuration(format!(
                "model outputs {} classes but the catalog has {} labels",
                model.num_classes(),
                catalog.len()
            )));
        }
        let preprocessor = ImagePreprocessor::new(model.config().image_size, device);
        Ok(Self {
            model: Arc::new(model),
            catalog: Arc::new(catalog),
            preprocessor,
        })
    }

    /// The catalog this pipeline reports against
    #[must_use]
    pub fn catalog(&self) -> &LabelCatalog {
        &self.catalog
    }

    /// The shared classifier
    #[must_use]
    pub fn model(&self) -> &FundusNet {
        &self.model
    }

    /// Decode, classify, and rank: the full synchronous identification unit.
    ///
    /// CPU-bound; latency-sensitive callers should go through
    /// [`crate::bridge::InferenceBridge`] instead of calling this on a
    /// scheduling thread.
    pub fn identify_bytes(&self, bytes: &[u8], threshold: f32) -> Result<Vec<Prediction>> {
        let tensor = self.preprocessor.preprocess_bytes(bytes)?;
        let probabilities = self.model.infer(&tensor)?;
        let results = select::select(&self.catalog, &probabilities, threshold);
        debug!(
            "identified {} label(s) at threshold {threshold}",
            results.len()
        );
        Ok(results)
    }

    /// [`Self::identify_bytes`] for an image file on disk.
    pub fn identify_path(&self, path: &std::path::Path, threshold: f32) -> Result<Vec<Prediction>> {
        let tensor = self.preprocessor.preprocess_path(path)?;
        let probabilities = self.model.infer(&tensor)?;
        Ok(select::select(&self.catalog, &probabilities, threshold))
    }

    /// Decode and render a Grad-CAM overlay, PNG-encoded for transport.
    pub fn explain_bytes(&self, bytes: &[u8], options: &ExplainOptions) -> Result<Vec<u8>> {
        let tensor = self.preprocessor.preprocess_bytes(bytes)?;
        let overlay = gradcam::explain(&self.model, &tensor, options)?;
        gradcam::encode_png(&overlay)
    }

    /// [`Self::explain_bytes`] for an image file on disk.
    pub fn explain_path(&self, path: &std::path::Path, options: &ExplainOptions) -> Result<Vec<u8>> {
        let tensor = self.preprocessor.preprocess_path(path)?;
        let overlay = gradcam::explain(&self.model, &tensor, options)?;
        gradcam::encode_png(&overlay)
    }
}
