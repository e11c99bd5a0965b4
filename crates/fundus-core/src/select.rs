//! Confidence-threshold selection over a probability vector
//!
//! Multi-label identification never answers "nothing detected": when every
//! class falls below the caller's threshold, the single highest-probability
//! entry is returned instead. That fallback is deliberate product policy
//! carried over from the deployed service.

use serde::Serialize;

use crate::catalog::{Label, LabelCatalog};

/// Default confidence threshold used when the caller supplies none
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// One (label, probability) pair from a classifier run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Catalog entry this probability belongs to
    pub label: Label,
    /// Classifier confidence in [0, 1]
    pub probability: f32,
}

/// Pair probabilities with catalog entries, keep those at or above
/// `threshold`, and sort descending by probability.
///
/// The caller's threshold is taken as-is: `threshold <= 0` keeps every
/// label, a threshold above the maximum probability triggers the fallback.
/// If nothing qualifies, the result is exactly the arg-max entry, ties
/// broken by lowest ordinal index. The sort is stable, so equal
/// probabilities preserve catalog order.
///
/// The probability vector's length must equal the catalog size; that
/// alignment is validated when the pipeline is constructed, so a mismatch
/// here is a programming error.
#[must_use]
pub fn select(catalog: &LabelCatalog, probabilities: &[f32], threshold: f32) -> Vec<Prediction> {
    assert_eq!(
        probabilities.len(),
        catalog.len(),
        "probability vector is not aligned with the label catalog"
    );

    let mut results: Vec<Prediction> = catalog
        .iter()
        .zip(probabilities.iter())
        .filter(|(_, &p)| p >= threshold)
        .map(|(label, &probability)| Prediction {
            label: label.clone(),
            probability,
        })
        .collect();

    if results.is_empty() {
        // Keep the single most confident entry; strict comparison keeps the
        // lowest ordinal on ties.
        let mut best: Option<(&Label, f32)> = None;
        for (label, &p) in catalog.iter().zip(probabilities.iter()) {
            if best.map_or(true, |(_, bp)| p > bp) {
                best = Some((label, p));
            }
        }
        if let Some((label, probability)) = best {
            results.push(Prediction {
                label: label.clone(),
                probability,
            });
        }
    }

    // Vec::sort_by is stable: equal probabilities keep ordinal order.
    results.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    results
}
