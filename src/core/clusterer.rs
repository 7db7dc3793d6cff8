//! Greedy, threshold-gated agglomerative clustering of faces.
//!
//! Every face with an embedding starts as its own cluster. Each step scores
//! every pair of current clusters with the configured linkage, merges the best
//! pair if it reaches the similarity threshold and stops as soon as it does
//! not. There is no dendrogram and no fixed cluster count.

use crate::core::face::{Face, PersonCluster, new_cluster_id};
use crate::core::matrix::SimilarityMatrix;
use crate::core::similarity::{CosineSimilarity, SimilarityError, SimilarityMetric};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ClusterError {
    #[error("Similarity computation failed: {0}")]
    Similarity(#[from] SimilarityError),

    #[error("Face {face_id} has a {actual}-dimensional embedding, expected {expected}")]
    DimensionMismatch {
        face_id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Face {face_id} has a non-finite embedding component")]
    NonFiniteEmbedding { face_id: String },

    #[error("Invalid clustering options: {0}")]
    InvalidOptions(String),

    #[error("Cluster construction failed: {0}")]
    Identity(#[from] crate::core::face::IdentityError),
}

/// Rule turning face-level similarities into one inter-cluster similarity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Single,   // most similar face pair
    Complete, // least similar face pair
    #[default]
    Average, // mean over all face pairs
}

impl Linkage {
    fn combine(self, similarities: impl Iterator<Item = f64>) -> f64 {
        match self {
            Linkage::Single => similarities.fold(f64::NEG_INFINITY, f64::max),
            Linkage::Complete => similarities.fold(f64::INFINITY, f64::min),
            Linkage::Average => {
                let (sum, count) = similarities.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                if count > 0 { sum / count as f64 } else { 0.0 }
            }
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
        };
        f.write_str(name)
    }
}

impl FromStr for Linkage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(Linkage::Single),
            "complete" => Ok(Linkage::Complete),
            "average" => Ok(Linkage::Average),
            other => Err(format!("unknown linkage: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterOptions {
    pub similarity_threshold: f64,
    pub min_cluster_size: usize,
    pub max_clusters: usize,
    pub linkage: Linkage,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            min_cluster_size: 2,
            max_clusters: 50,
            linkage: Linkage::Average,
        }
    }
}

impl ClusterOptions {
    pub fn validate(&self) -> Result<(), ClusterError> {
        if !self.similarity_threshold.is_finite() {
            return Err(ClusterError::InvalidOptions(format!(
                "similarity threshold must be finite, got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClusteringResult {
    pub clusters: Vec<PersonCluster>,
    pub unclustered_faces: Vec<Face>,
    pub processing_time: Duration,
}

/// Working cluster: indices into the similarity matrix.
struct Group {
    members: Vec<usize>,
    confidence: f64,
}

pub struct HierarchicalClusterer<M = CosineSimilarity> {
    metric: M,
    defaults: ClusterOptions,
}

impl HierarchicalClusterer<CosineSimilarity> {
    pub fn cosine() -> Self {
        Self::new(CosineSimilarity::new())
    }
}

impl<M: SimilarityMetric + Sync> HierarchicalClusterer<M> {
    pub fn new(metric: M) -> Self {
        Self::with_defaults(metric, ClusterOptions::default())
    }

    pub fn with_defaults(metric: M, defaults: ClusterOptions) -> Self {
        Self { metric, defaults }
    }

    pub fn metric(&self) -> &M {
        &self.metric
    }

    pub fn defaults(&self) -> &ClusterOptions {
        &self.defaults
    }

    /// Cluster with the options this clusterer was built with
    pub fn cluster(&self, faces: &[Face]) -> Result<ClusteringResult, ClusterError> {
        self.cluster_faces(faces, &self.defaults)
    }

    pub fn cluster_faces(
        &self,
        faces: &[Face],
        options: &ClusterOptions,
    ) -> Result<ClusteringResult, ClusterError> {
        let start = Instant::now();
        options.validate()?;

        let (embedded, mut unclustered): (Vec<Face>, Vec<Face>) =
            faces.iter().cloned().partition(Face::has_embedding);

        if embedded.len() < options.min_cluster_size {
            log::debug!(
                "Only {} faces with embeddings (min cluster size {}), skipping clustering",
                embedded.len(),
                options.min_cluster_size
            );
            return Ok(ClusteringResult {
                clusters: Vec::new(),
                unclustered_faces: faces.to_vec(),
                processing_time: start.elapsed(),
            });
        }

        validate_embeddings(&embedded)?;
        let matrix = SimilarityMatrix::build(&embedded, &self.metric)?;

        let mut groups: Vec<Group> = embedded
            .iter()
            .enumerate()
            .map(|(i, face)| Group {
                members: vec![i],
                confidence: face.confidence,
            })
            .collect();

        while let Some((i, j, score)) = best_pair(&groups, &matrix, options.linkage) {
            if score < options.similarity_threshold {
                break;
            }
            log::debug!(
                "Merging clusters {} and {} at similarity {:.4} ({} remaining)",
                i,
                j,
                score,
                groups.len() - 1
            );
            let absorbed = groups.remove(j);
            let target = &mut groups[i];
            target.members.extend(absorbed.members);
            target.confidence = score;
        }

        let mut clusters = Vec::new();
        for group in groups {
            let members: Vec<Face> = group
                .members
                .iter()
                .map(|&idx| embedded[idx].clone())
                .collect();
            if members.len() < options.min_cluster_size {
                unclustered.extend(members);
            } else {
                clusters.push(PersonCluster::with_id(
                    new_cluster_id(),
                    members,
                    group.confidence,
                )?);
            }
        }

        clusters.sort_by(|a, b| {
            b.face_count().cmp(&a.face_count()).then_with(|| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(Ordering::Equal)
            })
        });
        if clusters.len() > options.max_clusters {
            for dropped in clusters.split_off(options.max_clusters) {
                unclustered.extend(dropped.faces);
            }
        }

        let processing_time = start.elapsed();
        log::info!(
            "Clustered {} faces into {} people ({} unclustered) in {:.2?}",
            faces.len(),
            clusters.len(),
            unclustered.len(),
            processing_time
        );

        Ok(ClusteringResult {
            clusters,
            unclustered_faces: unclustered,
            processing_time,
        })
    }
}

/// All embeddings in one pass must be finite and share a dimension.
pub(crate) fn validate_embeddings(faces: &[Face]) -> Result<(), ClusterError> {
    let Some(first) = faces.first() else {
        return Ok(());
    };
    let expected = first.embedding.len();
    for face in faces {
        if face.embedding.len() != expected {
            return Err(ClusterError::DimensionMismatch {
                face_id: face.id.clone(),
                expected,
                actual: face.embedding.len(),
            });
        }
        if !face.embedding.iter().all(|v| v.is_finite()) {
            return Err(ClusterError::NonFiniteEmbedding {
                face_id: face.id.clone(),
            });
        }
    }
    Ok(())
}

/// Highest-scoring pair of groups. Pairs are visited in (i, j) order with
/// i < j and only a strictly better score replaces the current best, so the
/// first pair wins ties.
fn best_pair(
    groups: &[Group],
    matrix: &SimilarityMatrix,
    linkage: Linkage,
) -> Option<(usize, usize, f64)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..groups.len() {
        for j in (i + 1)..groups.len() {
            let a = &groups[i].members;
            let b = &groups[j].members;
            let score = linkage.combine(
                a.iter()
                    .flat_map(|&x| b.iter().map(move |&y| matrix.get(x, y))),
            );
            if best.is_none_or(|(_, _, s)| score > s) {
                best = Some((i, j, score));
            }
        }
    }
    best
}
