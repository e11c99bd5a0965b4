//! fundus-core: multi-label fundus image identification with explanations
//!
//! This crate provides:
//! - Image preprocessing to the classifier's fixed input contract
//! - A candle-based multi-label fundus disease classifier (`FundusNet`)
//! - Confidence-threshold selection with an arg-max fallback
//! - A bounded async bridge keeping inference off scheduling threads
//! - Grad-CAM attribution rendered as a color overlay
//!
//! The classifier and label catalog are loaded once at startup and shared
//! read-only across all concurrent requests; see [`pipeline::IdentifyPipeline`].

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gradcam;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod select;

// Re-exports
pub use bridge::{InferenceBridge, PendingIdentification, DEFAULT_QUEUE_DEPTH};
pub use catalog::{Category, Label, LabelCatalog, ODIR_LABEL_COUNT};
pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use gradcam::{ExplainOptions, DEFAULT_OPACITY};
pub use model::{FundusNet, FundusNetConfig};
pub use pipeline::IdentifyPipeline;
pub use preprocess::{ImagePreprocessor, DEFAULT_IMAGE_SIZE};
pub use select::{select, Prediction, DEFAULT_THRESHOLD};

/// Create the appropriate compute device for the current platform
pub fn make_device() -> candle_core::Device {
    #[cfg(target_os = "macos")]
    {
        candle_core::Device::new_metal(0).unwrap_or(candle_core::Device::Cpu)
    }
    #[cfg(not(target_os = "macos"))]
    {
        candle_core::Device::Cpu
    }
}
