//! Embedding similarity.
//!
//! Similarities throughout the crate live in `[0, 1]`: cosine similarity is
//! remapped with `(cos + 1) / 2`, so identical directions score 1, orthogonal
//! vectors 0.5 and opposite vectors 0.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("Embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Embedding contains a non-finite component")]
    NonFinite,
}

/// Compares two face embeddings.
///
/// Implementations must be pure and symmetric and return values in `[0, 1]`.
pub trait SimilarityMetric {
    fn compare(&self, a: &[f32], b: &[f32]) -> Result<f64, SimilarityError>;
}

/// Cosine similarity remapped from `[-1, 1]` to `[0, 1]`.
///
/// Vectors of different length or with NaN/infinite components are rejected.
/// A zero-magnitude vector has no direction; its cosine is taken as 0, which
/// scores 0.5.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineSimilarity;

impl CosineSimilarity {
    pub fn new() -> Self {
        Self
    }
}

impl SimilarityMetric for CosineSimilarity {
    fn compare(&self, a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
        if a.len() != b.len() {
            return Err(SimilarityError::DimensionMismatch {
                left: a.len(),
                right: b.len(),
            });
        }
        if !a.iter().chain(b).all(|v| v.is_finite()) {
            return Err(SimilarityError::NonFinite);
        }

        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;
        for (&x, &y) in a.iter().zip(b.iter()) {
            let (x, y) = (x as f64, y as f64);
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        let cosine = if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        Ok((cosine + 1.0) / 2.0)
    }
}
