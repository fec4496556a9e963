use nalgebra::DVector;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Cosine similarity between two topic distributions, clamped to `[0, 1]`.
///
/// Zero vectors and dimension mismatches score 0.
pub fn cosine_similarity(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let norm_a = a.norm();
    let norm_b = b.norm();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (a.dot(b) / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
    pub source_index: usize,
    pub target_index: usize,
    pub similarity: f64,
}

/// Shared cancel flag and progress counter for a running sweep.
#[derive(Debug, Default)]
pub struct SweepControl {
    cancelled: AtomicBool,
    rows_done: AtomicUsize,
}

impl SweepControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn rows_done(&self) -> usize {
        self.rows_done.load(Ordering::Relaxed)
    }
}

/// Scores every unordered pair `(i, j)` with `i < j` and keeps those at or
/// above `threshold`.
///
/// Rows are scored in parallel but results come back in loop order.
/// Returns `None` when the sweep was cancelled.
pub fn pairwise_sweep(
    distributions: &[Vec<f64>],
    threshold: f64,
    control: &SweepControl,
) -> Option<Vec<ScoredPair>> {
    let vectors: Vec<DVector<f64>> = distributions
        .iter()
        .map(|row| DVector::from_column_slice(row))
        .collect();

    let rows: Vec<Vec<ScoredPair>> = (0..vectors.len())
        .into_par_iter()
        .map(|i| {
            if control.is_cancelled() {
                return Vec::new();
            }
            let row = ((i + 1)..vectors.len())
                .filter_map(|j| {
                    let similarity = cosine_similarity(&vectors[i], &vectors[j]);
                    (similarity >= threshold).then_some(ScoredPair {
                        source_index: i,
                        target_index: j,
                        similarity,
                    })
                })
                .collect();
            control.rows_done.fetch_add(1, Ordering::Relaxed);
            row
        })
        .collect();

    if control.is_cancelled() {
        return None;
    }

    Some(rows.into_iter().flatten().collect())
}
