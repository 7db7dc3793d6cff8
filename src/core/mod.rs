pub mod clusterer;
pub mod face;
pub mod matrix;
pub mod resolver;
pub mod similarity;

pub use clusterer::{
    ClusterError, ClusterOptions, ClusteringResult, HierarchicalClusterer, Linkage,
};
pub use face::{
    BoundingBox, Face, FaceAttributes, IdentityError, Landmark, PersonCluster, PersonLabel, Photo,
};
pub use matrix::SimilarityMatrix;
pub use resolver::{FaceAssignment, IdentityResolver, SplitOptions};
pub use similarity::{CosineSimilarity, SimilarityError, SimilarityMetric};
