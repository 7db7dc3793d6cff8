use crate::core::clusterer::{ClusterError, ClusterOptions, HierarchicalClusterer, Linkage};
use crate::core::face::{Face, Photo, PersonCluster};
use crate::core::similarity::{CosineSimilarity, SimilarityError, SimilarityMetric};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Clusters smaller than this are never re-partitioned.
pub const MIN_FACES_FOR_SPLIT: usize = 4;

/// How much stricter than the clustering threshold a split pass is by default.
pub const DEFAULT_SPLIT_THRESHOLD_DELTA: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceAssignment {
    pub cluster: Option<PersonCluster>,
    pub is_new_cluster: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplitOptions {
    /// Overrides the derived threshold (clusterer default + split delta)
    pub threshold: Option<f64>,
    pub min_cluster_size: usize,
    pub linkage: Linkage,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            min_cluster_size: 1,
            linkage: Linkage::Average,
        }
    }
}

/// Incremental maintenance of the identity set: assigning new faces, merging
/// and splitting people, and attaching photos.
///
/// Every operation returns new cluster values; the inputs are never modified.
pub struct IdentityResolver<M = CosineSimilarity> {
    clusterer: HierarchicalClusterer<M>,
    split_threshold_delta: f64,
}

impl IdentityResolver<CosineSimilarity> {
    pub fn cosine() -> Self {
        Self::new(HierarchicalClusterer::cosine())
    }
}

impl<M: SimilarityMetric + Sync> IdentityResolver<M> {
    pub fn new(clusterer: HierarchicalClusterer<M>) -> Self {
        Self {
            clusterer,
            split_threshold_delta: DEFAULT_SPLIT_THRESHOLD_DELTA,
        }
    }

    pub fn with_split_threshold_delta(mut self, delta: f64) -> Self {
        self.split_threshold_delta = delta;
        self
    }

    pub fn clusterer(&self) -> &HierarchicalClusterer<M> {
        &self.clusterer
    }

    /// Mean similarity between `face` and every embedding-bearing face of
    /// `cluster`. `None` when the cluster has no usable embeddings.
    pub fn mean_similarity(
        &self,
        face: &Face,
        cluster: &PersonCluster,
    ) -> Result<Option<f64>, SimilarityError> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for member in cluster.embedded_faces() {
            sum += self
                .clusterer
                .metric()
                .compare(&face.embedding, &member.embedding)?;
            count += 1;
        }
        Ok((count > 0).then(|| sum / count as f64))
    }

    /// Place a newly detected face without re-clustering.
    ///
    /// The face joins the existing cluster with the highest mean similarity
    /// that reaches `threshold` (first one wins on ties). Otherwise it starts a
    /// new singleton cluster. Faces without an embedding are not placed at all.
    pub fn add_face_to_cluster(
        &self,
        face: &Face,
        existing_clusters: &[PersonCluster],
        threshold: f64,
    ) -> Result<FaceAssignment, ClusterError> {
        if !face.has_embedding() {
            log::debug!("Face {} has no embedding, not assigned", face.id);
            return Ok(FaceAssignment {
                cluster: None,
                is_new_cluster: false,
            });
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, cluster) in existing_clusters.iter().enumerate() {
            let Some(similarity) = self.mean_similarity(face, cluster)? else {
                continue;
            };
            if similarity >= threshold && best.is_none_or(|(_, s)| similarity > s) {
                best = Some((idx, similarity));
            }
        }

        match best {
            Some((idx, similarity)) => {
                let mut updated = existing_clusters[idx].clone();
                updated.faces.push(face.clone());
                // running mean, not a full recompute
                updated.confidence = (updated.confidence + similarity) / 2.0;
                updated.updated_at = Utc::now();
                log::debug!(
                    "Face {} joined {} at similarity {:.4}",
                    face.id,
                    updated.id,
                    similarity
                );
                Ok(FaceAssignment {
                    cluster: Some(updated),
                    is_new_cluster: false,
                })
            }
            None => {
                let cluster = PersonCluster::new(vec![face.clone()], face.confidence)?;
                log::debug!("Face {} started new person {}", face.id, cluster.id);
                Ok(FaceAssignment {
                    cluster: Some(cluster),
                    is_new_cluster: true,
                })
            }
        }
    }

    /// Combine two people into one new cluster.
    ///
    /// The face sets must be disjoint; deduplication is the caller's job.
    /// Photo backlinks are concatenated as-is.
    pub fn merge_clusters(&self, first: &PersonCluster, second: &PersonCluster) -> PersonCluster {
        let mut faces = Vec::with_capacity(first.face_count() + second.face_count());
        faces.extend(first.faces.iter().cloned());
        faces.extend(second.faces.iter().cloned());

        let mut photos = first.photos.clone();
        photos.extend(second.photos.iter().cloned());

        PersonCluster {
            id: format!("merged_{}_{}", first.id, second.id),
            label_id: None,
            faces,
            photos,
            confidence: (first.confidence + second.confidence) / 2.0,
            created_at: first.created_at.min(second.created_at),
            updated_at: Utc::now(),
        }
    }

    /// Re-partition an over-merged person with a stricter threshold.
    ///
    /// Returns the cluster unchanged when it has fewer than
    /// [`MIN_FACES_FOR_SPLIT`] faces or when the stricter pass still finds a
    /// single identity. Faces that end up in no fragment (no embedding, or
    /// dropped by `min_cluster_size`) join the largest fragment.
    pub fn split_cluster(
        &self,
        cluster: &PersonCluster,
        options: &SplitOptions,
    ) -> Result<Vec<PersonCluster>, ClusterError> {
        if cluster.face_count() < MIN_FACES_FOR_SPLIT {
            return Ok(vec![cluster.clone()]);
        }

        let threshold = options.threshold.unwrap_or(
            self.clusterer.defaults().similarity_threshold + self.split_threshold_delta,
        );
        let pass = ClusterOptions {
            similarity_threshold: threshold,
            min_cluster_size: options.min_cluster_size,
            max_clusters: cluster.face_count(),
            linkage: options.linkage,
        };
        let result = self.clusterer.cluster_faces(&cluster.faces, &pass)?;

        if result.clusters.len() < 2 {
            log::debug!(
                "Split of {} at threshold {:.3} found a single identity",
                cluster.id,
                threshold
            );
            return Ok(vec![cluster.clone()]);
        }

        let mut parts = result.clusters;
        // sorted largest first by the clusterer
        parts[0].faces.extend(result.unclustered_faces);

        let now = Utc::now();
        let fragments: Vec<PersonCluster> = parts
            .into_iter()
            .enumerate()
            .map(|(n, part)| {
                let face_ids: HashSet<&str> = part.faces.iter().map(|f| f.id.as_str()).collect();
                let photos = photos_with_faces(&cluster.photos, &face_ids);
                PersonCluster {
                    id: format!("{}_part{}", cluster.id, n + 1),
                    label_id: None,
                    photos,
                    confidence: part.confidence,
                    created_at: now,
                    updated_at: now,
                    faces: part.faces,
                }
            })
            .collect();

        log::info!(
            "Split {} into {} people at threshold {:.3}",
            cluster.id,
            fragments.len(),
            threshold
        );
        Ok(fragments)
    }

    /// Attach to each cluster every photo carrying at least one of its faces.
    pub fn link_clusters_to_photos(
        &self,
        clusters: &[PersonCluster],
        photos: &[Photo],
    ) -> Vec<PersonCluster> {
        clusters
            .iter()
            .map(|cluster| {
                let face_ids: HashSet<&str> =
                    cluster.faces.iter().map(|f| f.id.as_str()).collect();
                let mut linked = cluster.clone();
                linked.photos = photos_with_faces(photos, &face_ids);
                linked
            })
            .collect()
    }
}

fn photos_with_faces(photos: &[Photo], face_ids: &HashSet<&str>) -> Vec<Photo> {
    photos
        .iter()
        .filter(|p| p.faces.iter().any(|f| face_ids.contains(f.id.as_str())))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn face(id: &str, embedding: Vec<f32>) -> Face {
        Face::new(id, embedding, 0.9)
    }

    fn cluster(id: &str, faces: Vec<Face>, confidence: f64) -> PersonCluster {
        PersonCluster::with_id(id, faces, confidence).unwrap()
    }

    /// Two sub-groups whose centres score 0.65 against each other: close
    /// enough to be merged at 0.6, too far apart at 0.7.
    fn over_merged() -> PersonCluster {
        let v = [0.3f32, 0.953_939_2];
        let mut c = cluster(
            "p1",
            vec![
                face("a1", vec![1.0, 0.0]),
                face("b1", vec![v[0], v[1]]),
                face("a2", vec![1.0, 0.01]),
                face("b2", vec![v[0] + 0.01, v[1]]),
            ],
            0.65,
        );
        c.photos = vec![
            Photo::new("ph1", "/1.jpg", vec![face("a1", Vec::new())]),
            Photo::new("ph2", "/2.jpg", vec![face("b1", Vec::new())]),
            Photo::new(
                "ph3",
                "/3.jpg",
                vec![face("a2", Vec::new()), face("b2", Vec::new())],
            ),
        ];
        c
    }

    #[test]
    fn test_add_face_without_embedding() {
        let resolver = IdentityResolver::cosine();
        let existing = vec![cluster("p1", vec![face("a", vec![1.0, 0.0])], 0.9)];
        let assignment = resolver
            .add_face_to_cluster(&face("new", Vec::new()), &existing, 0.6)
            .unwrap();
        assert_eq!(
            assignment,
            FaceAssignment {
                cluster: None,
                is_new_cluster: false
            }
        );
    }

    #[test]
    fn test_add_face_joins_best_cluster() {
        let resolver = IdentityResolver::cosine();
        let existing = vec![
            cluster("far", vec![face("x", vec![-1.0, 0.0])], 0.9),
            cluster(
                "near",
                vec![face("a", vec![1.0, 0.0]), face("b", vec![1.0, 0.1])],
                0.8,
            ),
        ];
        let new_face = face("c", vec![1.0, 0.05]);
        let assignment = resolver
            .add_face_to_cluster(&new_face, &existing, 0.6)
            .unwrap();

        assert!(!assignment.is_new_cluster);
        let updated = assignment.cluster.unwrap();
        assert_eq!(updated.id, "near");
        assert_eq!(updated.face_count(), 3);
        assert_eq!(updated.faces[2].id, "c");

        let sim = resolver
            .mean_similarity(&new_face, &existing[1])
            .unwrap()
            .unwrap();
        assert!((updated.confidence - (0.8 + sim) / 2.0).abs() < 1e-12);
        // input left untouched
        assert_eq!(existing[1].face_count(), 2);
        assert_eq!(existing[1].confidence, 0.8);
    }

    #[test]
    fn test_add_face_skips_members_without_embeddings() {
        let resolver = IdentityResolver::cosine();
        let existing = vec![cluster(
            "p1",
            vec![face("a", vec![1.0, 0.0]), face("blank", Vec::new())],
            0.9,
        )];
        let sim = resolver
            .mean_similarity(&face("n", vec![1.0, 0.0]), &existing[0])
            .unwrap();
        assert_eq!(sim, Some(1.0));

        let only_blank = cluster("p2", vec![face("blank", Vec::new())], 0.9);
        assert_eq!(
            resolver
                .mean_similarity(&face("n", vec![1.0, 0.0]), &only_blank)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_add_face_tie_goes_to_first_cluster() {
        let resolver = IdentityResolver::cosine();
        let existing = vec![
            cluster("first", vec![face("a", vec![1.0, 0.0])], 0.9),
            cluster("second", vec![face("b", vec![1.0, 0.0])], 0.9),
        ];
        let assignment = resolver
            .add_face_to_cluster(&face("n", vec![1.0, 0.0]), &existing, 0.6)
            .unwrap();
        assert_eq!(assignment.cluster.unwrap().id, "first");
    }

    #[test]
    fn test_add_face_creates_singleton() {
        let resolver = IdentityResolver::cosine();
        let existing = vec![cluster("p1", vec![face("a", vec![1.0, 0.0])], 0.9)];
        let new_face = Face::new("n", vec![0.0, 1.0], 0.73);
        let assignment = resolver
            .add_face_to_cluster(&new_face, &existing, 0.6)
            .unwrap();

        assert!(assignment.is_new_cluster);
        let created = assignment.cluster.unwrap();
        assert_eq!(created.faces, vec![new_face]);
        assert_eq!(created.confidence, 0.73);
        assert_ne!(created.id, "p1");
    }

    #[test]
    fn test_add_face_dimension_mismatch() {
        let resolver = IdentityResolver::cosine();
        let existing = vec![cluster("p1", vec![face("a", vec![1.0, 0.0])], 0.9)];
        let err = resolver
            .add_face_to_cluster(&face("n", vec![1.0, 0.0, 0.0]), &existing, 0.6)
            .unwrap_err();
        assert!(matches!(err, ClusterError::Similarity(_)));
    }

    #[test]
    fn test_merge_clusters() {
        let resolver = IdentityResolver::cosine();
        let mut first = cluster(
            "p1",
            vec![face("a", vec![1.0]), face("b", vec![1.0])],
            0.8,
        );
        let mut second = cluster("p2", vec![face("c", vec![1.0])], 0.6);
        first.created_at -= Duration::days(10);
        second.created_at -= Duration::days(2);
        first.photos = vec![Photo::new("ph1", "/1.jpg", Vec::new())];
        second.photos = vec![
            Photo::new("ph1", "/1.jpg", Vec::new()),
            Photo::new("ph2", "/2.jpg", Vec::new()),
        ];

        let merged = resolver.merge_clusters(&first, &second);

        assert_eq!(merged.face_count(), 3);
        assert!((merged.confidence - 0.7).abs() < 1e-12);
        assert_eq!(merged.created_at, first.created_at);
        assert!(merged.updated_at >= first.updated_at);
        assert_eq!(merged.id, "merged_p1_p2");
        assert!(merged.id.contains(&first.id) && merged.id.contains(&second.id));
        // photo backlinks are not deduplicated here
        assert_eq!(merged.photo_count(), 3);
    }

    #[test]
    fn test_split_small_cluster_is_noop() {
        let resolver = IdentityResolver::cosine();
        let small = cluster(
            "p1",
            vec![
                face("a", vec![1.0, 0.0]),
                face("b", vec![-1.0, 0.0]),
                face("c", vec![0.0, 1.0]),
            ],
            0.5,
        );
        let parts = resolver.split_cluster(&small, &SplitOptions::default()).unwrap();
        assert_eq!(parts, vec![small]);
    }

    #[test]
    fn test_split_separates_over_merged_cluster() {
        let resolver = IdentityResolver::cosine();
        let original = over_merged();

        // The default clustering threshold keeps the faces together.
        let together = resolver
            .clusterer()
            .cluster_faces(&original.faces, &ClusterOptions::default())
            .unwrap();
        assert_eq!(together.clusters.len(), 1);

        let parts = resolver
            .split_cluster(&original, &SplitOptions::default())
            .unwrap();
        assert_eq!(parts.len(), 2);

        let a = parts.iter().find(|p| p.contains_face("a1")).unwrap();
        let b = parts.iter().find(|p| p.contains_face("b1")).unwrap();
        assert!(a.contains_face("a2"));
        assert!(b.contains_face("b2"));
        assert_eq!(a.face_count() + b.face_count(), 4);
        assert!(a.id.starts_with("p1_part") && b.id.starts_with("p1_part"));

        // ph3 straddles both fragments and is attached to each.
        let photo_ids = |c: &PersonCluster| -> Vec<String> {
            c.photos.iter().map(|p| p.id.clone()).collect()
        };
        assert_eq!(photo_ids(a), vec!["ph1", "ph3"]);
        assert_eq!(photo_ids(b), vec!["ph2", "ph3"]);
    }

    #[test]
    fn test_split_keeps_faces_without_embeddings() {
        let resolver = IdentityResolver::cosine();
        let mut original = over_merged();
        original.faces.push(face("blank", Vec::new()));

        let parts = resolver
            .split_cluster(&original, &SplitOptions::default())
            .unwrap();
        let total: usize = parts.iter().map(PersonCluster::face_count).sum();
        assert_eq!(total, 5);
        assert!(parts.iter().any(|p| p.contains_face("blank")));
    }

    #[test]
    fn test_split_folds_undersized_groups_into_largest() {
        let resolver = IdentityResolver::cosine();
        let mut original = over_merged();
        // opposite to the a-faces, 0.35 against the b-faces
        original.faces.push(face("outlier", vec![-1.0, 0.0]));

        let options = SplitOptions {
            min_cluster_size: 2,
            ..Default::default()
        };
        let parts = resolver.split_cluster(&original, &options).unwrap();

        assert_eq!(parts.len(), 2);
        let total: usize = parts.iter().map(PersonCluster::face_count).sum();
        assert_eq!(total, 5);
        assert!(parts[0].contains_face("outlier"));
        assert!(!parts[1].contains_face("outlier"));
        assert_eq!(parts[0].face_count(), 3);
        assert_eq!(parts[1].face_count(), 2);
    }

    #[test]
    fn test_split_cohesive_cluster_returns_original() {
        let resolver = IdentityResolver::cosine();
        let tight = cluster(
            "p1",
            vec![
                face("a", vec![1.0, 0.0]),
                face("b", vec![1.0, 0.01]),
                face("c", vec![1.0, 0.02]),
                face("d", vec![1.0, 0.03]),
            ],
            0.99,
        );
        let parts = resolver.split_cluster(&tight, &SplitOptions::default()).unwrap();
        assert_eq!(parts, vec![tight]);
    }

    #[test]
    fn test_split_threshold_override() {
        let resolver = IdentityResolver::cosine();
        let options = SplitOptions {
            threshold: Some(0.6),
            ..Default::default()
        };
        let parts = resolver.split_cluster(&over_merged(), &options).unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_link_clusters_to_photos() {
        let resolver = IdentityResolver::cosine();
        let clusters = vec![
            cluster("p1", vec![face("a", vec![1.0]), face("b", vec![1.0])], 0.9),
            cluster("p2", vec![face("c", vec![1.0])], 0.9),
        ];
        let photos = vec![
            Photo::new("ph1", "/1.jpg", vec![face("a", Vec::new())]),
            Photo::new(
                "ph2",
                "/2.jpg",
                vec![face("b", Vec::new()), face("c", Vec::new())],
            ),
            Photo::new("ph3", "/3.jpg", vec![face("zzz", Vec::new())]),
        ];

        let linked = resolver.link_clusters_to_photos(&clusters, &photos);
        assert_eq!(linked[0].photo_count(), 2);
        assert_eq!(linked[1].photo_count(), 1);
        assert_eq!(linked[1].photos[0].id, "ph2");
        assert!(clusters[0].photos.is_empty());
    }
}
