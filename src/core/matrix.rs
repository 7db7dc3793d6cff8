use crate::core::face::Face;
use crate::core::similarity::{SimilarityError, SimilarityMetric};
use rayon::prelude::*;

/// Symmetric pairwise similarity table over a fixed face ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatrix {
    size: usize,
    values: Vec<f64>, // row-major, size * size
}

impl SimilarityMatrix {
    /// Build the table for `faces`, which must all carry an embedding.
    ///
    /// Only the upper triangle is computed (one rayon task per row); the lower
    /// triangle is mirrored and the diagonal is fixed at 1.0.
    pub fn build<M>(faces: &[Face], metric: &M) -> Result<Self, SimilarityError>
    where
        M: SimilarityMetric + Sync,
    {
        let size = faces.len();

        let upper: Vec<Vec<f64>> = (0..size)
            .into_par_iter()
            .map(|i| {
                ((i + 1)..size)
                    .map(|j| metric.compare(&faces[i].embedding, &faces[j].embedding))
                    .collect::<Result<Vec<f64>, SimilarityError>>()
            })
            .collect::<Result<_, _>>()?;

        let mut values = vec![0.0; size * size];
        for (i, row) in upper.into_iter().enumerate() {
            values[i * size + i] = 1.0;
            for (offset, sim) in row.into_iter().enumerate() {
                let j = i + 1 + offset;
                values[i * size + j] = sim;
                values[j * size + i] = sim;
            }
        }

        Ok(Self { size, values })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.size..(i + 1) * self.size]
    }
}
