//! Pretrained multi-label fundus classifier
//!
//! `FundusNet` is a convolutional network with independent sigmoid outputs,
//! one per catalog label: an image may show several diseases at once, so the
//! per-class probabilities are not a softmax distribution. Weights are loaded
//! once at process start from a safetensors artifact; inference takes `&self`
//! and candle weight tensors are immutable after load, so a single instance
//! is safely shared across worker threads without locking.
//!
//! The forward pass is split in two (`forward_to` / `forward_from`) so the
//! attribution engine can capture the feature map of a named conv block and
//! re-enter the graph through a differentiable variable.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};

/// Network shape for a `FundusNet` deployment.
#[derive(Debug, Clone)]
pub struct FundusNetConfig {
    /// Square input edge length in pixels
    pub image_size: usize,
    /// Output channels of each conv block; one 2x max-pool per block
    pub block_channels: Vec<usize>,
    /// Number of output classes; must equal the label catalog size
    pub num_classes: usize,
}

impl FundusNetConfig {
    /// Configuration of the deployed ODIR classifier: 224x224 input,
    /// four conv stages, 37 disease classes.
    #[must_use]
    pub fn odir() -> Self {
        Self {
            image_size: 224,
            block_channels: vec![32, 64, 128, 256],
            num_classes: 37,
        }
    }
}

/// One conv stage: 3x3 convolution, ReLU, 2x2 max pool.
#[derive(Debug)]
struct ConvBlock {
    conv: Conv2d,
}

impl ConvBlock {
    fn new(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv = candle_nn::conv2d(in_channels, out_channels, 3, cfg, vb.pp("conv"))?;
        Ok(Self { conv })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.conv.forward(xs)?.relu()?;
        let xs = xs.max_pool2d(2)?;
        Ok(xs)
    }
}

/// Multi-label fundus image classifier.
#[derive(Debug)]
pub struct FundusNet {
    blocks: Vec<ConvBlock>,
    fc: Linear,
    config: FundusNetConfig,
}

impl FundusNet {
    /// Build the network from a variable source (mmapped safetensors in
    /// production, a `VarMap` in tests).
    pub fn new(vb: VarBuilder, config: &FundusNetConfig) -> Result<Self> {
        if config.block_channels.is_empty() {
            return Err(Error::Configuration(
                "model must have at least one conv block".to_string(),
            ));
        }
        if config.num_classes == 0 {
            return Err(Error::Configuration(
                "model must have at least one output class".to_string(),
            ));
        }
        let pool_factor = 1usize << config.block_channels.len();
        if config.image_size % pool_factor != 0 {
            return Err(Error::Configuration(format!(
                "image size {} is not divisible by the pooling factor {pool_factor}",
                config.image_size
            )));
        }

        let mut blocks = Vec::with_capacity(config.block_channels.len());
        let mut in_channels = 3;
        for (i, &out_channels) in config.block_channels.iter().enumerate() {
            let name = format!("block{}", i + 1);
            blocks.push(ConvBlock::new(in_channels, out_channels, vb.pp(&name))?);
            in_channels = out_channels;
        }

        let fc = candle_nn::linear(in_channels, config.num_classes, vb.pp("head").pp("fc"))?;

        Ok(Self {
            blocks,
            fc,
            config: config.clone(),
        })
    }

    /// Load trained weights from a safetensors artifact.
    ///
    /// Absence or corruption of the artifact is fatal to startup: the
    /// process cannot serve without a model.
    pub fn load(weights_path: &Path, config: &FundusNetConfig, device: &Device) -> Result<Self> {
        info!("Loading fundus model from {:?}", weights_path);
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)
                .map_err(|e| Error::ModelLoad(format!("{}: {e}", weights_path.display())))?
        };
        let model = Self::new(vb, config).map_err(|e| match e {
            Error::Configuration(msg) => Error::Configuration(msg),
            other => Error::ModelLoad(other.to_string()),
        })?;
        info!(
            "Fundus model loaded ({} conv blocks, {} classes)",
            model.blocks.len(),
            model.config.num_classes
        );
        Ok(model)
    }

    /// Network shape this instance was built with
    #[must_use]
    pub fn config(&self) -> &FundusNetConfig {
        &self.config
    }

    /// Number of output classes
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    /// Names of the conv blocks, in forward order ("block1", "block2", ...)
    #[must_use]
    pub fn layer_names(&self) -> Vec<String> {
        (1..=self.blocks.len()).map(|i| format!("block{i}")).collect()
    }

    /// Index of the last conv block, the default attribution target
    #[must_use]
    pub fn last_block(&self) -> usize {
        self.blocks.len() - 1
    }

    /// Resolve a conv block name to its index.
    #[must_use]
    pub fn block_index(&self, name: &str) -> Option<usize> {
        self.layer_names().iter().position(|n| n == name)
    }

    /// Run the conv stages up to and including `block` and return that
    /// block's feature map, shape `(1, C, h, w)`.
    pub fn forward_to(&self, xs: &Tensor, block: usize) -> Result<Tensor> {
        let mut xs = xs.clone();
        for b in &self.blocks[..=block] {
            xs = b.forward(&xs)?;
        }
        Ok(xs)
    }

    /// Continue the forward pass from the feature map of `block` through the
    /// remaining stages and the classification head. Returns per-class
    /// probabilities, shape `(1, num_classes)`.
    pub fn forward_from(&self, features: &Tensor, block: usize) -> Result<Tensor> {
        let mut xs = features.clone();
        for b in &self.blocks[block + 1..] {
            xs = b.forward(&xs)?;
        }
        // Global average pooling over the spatial axes
        let pooled = xs.mean(3)?.mean(2)?;
        let logits = self.fc.forward(&pooled)?;
        let probs = candle_nn::ops::sigmoid(&logits)?;
        Ok(probs)
    }

    /// Full forward pass: `(1, 3, S, S)` tensor in [0, 1] to a probability
    /// vector aligned with the label catalog.
    pub fn infer(&self, xs: &Tensor) -> Result<Vec<f32>> {
        let (batch, channels, height, width) = xs.dims4()?;
        if batch != 1 || channels != 3 || height != self.config.image_size || width != height {
            return Err(Error::Inference(format!(
                "expected input shape (1, 3, {s}, {s}), got ({batch}, {channels}, {height}, {width})",
                s = self.config.image_size
            )));
        }
        let last = self.last_block();
        let features = self.forward_to(xs, last)?;
        let probs = self.forward_from(&features, last)?;
        let probs: Vec<f32> = probs.squeeze(0)?.to_vec1()?;
        Ok(probs)
    }
}
