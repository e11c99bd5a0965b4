//! Async offload of CPU-bound identification work
//!
//! Model inference is synchronous and CPU-heavy; running it on a scheduling
//! thread would stall every other in-flight request. The bridge packages
//! preprocess + infer + select as one blocking unit on tokio's blocking
//! pool, bounded by two semaphores:
//!
//! - an admission semaphore (workers + queue depth): `submit` rejects with
//!   [`Error::Overloaded`] once it is exhausted, so work is never queued
//!   without bound and callers can shed load;
//! - a worker semaphore: at most the configured number of units execute
//!   concurrently.
//!
//! No ordering is guaranteed between concurrent units, and there is no
//! cancellation once a unit has been dispatched: dropping the pending handle
//! detaches the work but does not stop it. Callers needing bounded latency
//! should layer a timeout over [`PendingIdentification::join`] and treat
//! expiry as distinct from computation failure.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::IdentifyPipeline;
use crate::select::Prediction;

/// Default number of queued units accepted beyond the executing ones
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Bounded dispatcher for identification requests.
pub struct InferenceBridge {
    pipeline: Arc<IdentifyPipeline>,
    workers: Arc<Semaphore>,
    admission: Arc<Semaphore>,
}

impl InferenceBridge {
    /// Create a bridge over a shared pipeline with a fixed worker count and
    /// queue depth, both chosen at startup and never resized.
    #[must_use]
    pub fn new(pipeline: Arc<IdentifyPipeline>, workers: usize, queue_depth: usize) -> Self {
        let workers = workers.max(1);
        Self {
            pipeline,
            workers: Arc::new(Semaphore::new(workers)),
            admission: Arc::new(Semaphore::new(workers + queue_depth)),
        }
    }

    /// Submit raw image bytes for identification.
    ///
    /// Returns immediately with a handle; the caller's scheduling turn is
    /// never occupied by inference. Must be called from within a tokio
    /// runtime. Fails fast with [`Error::Overloaded`] when admission
    /// capacity is exhausted.
    pub fn submit(&self, bytes: Vec<u8>, threshold: f32) -> Result<PendingIdentification> {
        let permit = self.admission.clone().try_acquire_owned().map_err(|_| {
            warn!("identification request rejected: admission capacity exhausted");
            Error::Overloaded
        })?;

        let workers = Arc::clone(&self.workers);
        let pipeline = Arc::clone(&self.pipeline);

        let handle = tokio::spawn(async move {
            // Admission permit is held for the unit's whole lifetime,
            // including time spent waiting for a worker slot.
            let _admission = permit;
            let _worker = workers
                .acquire_owned()
                .await
                .map_err(|_| Error::Inference("worker pool closed".to_string()))?;

            debug!("running identification unit on blocking pool");
            tokio::task::spawn_blocking(move || pipeline.identify_bytes(&bytes, threshold))
                .await
                .map_err(|e| Error::Inference(format!("identification unit aborted: {e}")))?
        });

        Ok(PendingIdentification { handle })
    }
}

/// Handle to an in-flight identification unit.
///
/// Awaiting [`join`](Self::join) is the single suspension point of the
/// identification path; the unit's failure (decode error, inference error)
/// propagates through it, never silently swallowed.
#[derive(Debug)]
pub struct PendingIdentification {
    handle: JoinHandle<Result<Vec<Prediction>>>,
}

impl PendingIdentification {
    /// Wait for the unit to finish and return its ranked result set.
    pub async fn join(self) -> Result<Vec<Prediction>> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::Inference(format!(
                "identification unit panicked: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Category, LabelCatalog};
    use crate::model::tests::{random_model, tiny_config};
    use candle_core::Device;
    use image::codecs::png::PngEncoder;
    use image::{ImageEncoder, RgbImage};

    fn test_pipeline() -> Arc<IdentifyPipeline> {
        let config = tiny_config();
        let model = random_model(&config);
        let catalog = LabelCatalog::new(
            (0..config.num_classes).map(|i| (format!("disease {i}"), Some(Category::Other))),
        );
        Arc::new(IdentifyPipeline::new(model, catalog, &Device::Cpu).unwrap())
    }

    fn png_bytes(seed: u8) -> Vec<u8> {
        let rgb = RgbImage::from_fn(40, 40, |x, y| {
            image::Rgb([seed.wrapping_add(x as u8), (y % 256) as u8, seed])
        });
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(rgb.as_raw(), 40, 40, image::ExtendedColorType::Rgb8)
            .unwrap();
        bytes
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_units_match_synchronous_results() {
        let pipeline = test_pipeline();
        let bridge = InferenceBridge::new(Arc::clone(&pipeline), 4, DEFAULT_QUEUE_DEPTH);

        let expected_a = pipeline.identify_bytes(&png_bytes(1), 0.0).unwrap();
        let expected_b = pipeline.identify_bytes(&png_bytes(200), 0.0).unwrap();

        let pending: Vec<_> = (0..50)
            .map(|i| {
                let seed = if i % 2 == 0 { 1 } else { 200 };
                bridge.submit(png_bytes(seed), 0.0).unwrap()
            })
            .collect();

        for (i, handle) in pending.into_iter().enumerate() {
            let results = handle.join().await.unwrap();
            let expected = if i % 2 == 0 { &expected_a } else { &expected_b };
            assert_eq!(&results, expected, "unit {i} diverged from sync result");
        }
    }

    #[tokio::test]
    async fn test_admission_capacity_rejects_with_overload() {
        // Current-thread runtime: spawned units cannot make progress until
        // this task awaits, so permits stay held across the submits below.
        let bridge = InferenceBridge::new(test_pipeline(), 1, 1);

        let first = bridge.submit(png_bytes(0), 0.1).unwrap();
        let second = bridge.submit(png_bytes(0), 0.1).unwrap();
        let err = bridge.submit(png_bytes(0), 0.1).unwrap_err();
        assert!(matches!(err, Error::Overloaded));

        // Capacity frees up once units complete.
        first.join().await.unwrap();
        second.join().await.unwrap();
        bridge.submit(png_bytes(0), 0.1).unwrap().join().await.unwrap();
    }

    #[tokio::test]
    async fn test_unit_failure_propagates_through_handle() {
        let bridge = InferenceBridge::new(test_pipeline(), 2, 4);
        let err = bridge
            .submit(b"not an image".to_vec(), 0.1)
            .unwrap()
            .join()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
