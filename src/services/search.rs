use crate::core::face::{Face, PersonCluster};
use crate::core::similarity::{CosineSimilarity, SimilarityError, SimilarityMetric};
use crate::services::identity::PersonIdentityStore;
use crate::services::label_store::{LabelStore, StoreError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Faces covering more than this fraction of the photo count as "large".
pub const LARGE_FACE_AREA_FRACTION: f64 = 0.1;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Label lookup failed: {0}")]
    Store(#[from] StoreError),

    #[error("Similarity computation failed: {0}")]
    Similarity(#[from] SimilarityError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    Name,
    PhotoCount,
    Confidence,
    LastSeen,
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "name" => Ok(SortBy::Name),
            "photocount" | "photos" => Ok(SortBy::PhotoCount),
            "confidence" => Ok(SortBy::Confidence),
            "lastseen" => Ok(SortBy::LastSeen),
            other => Err(format!("unknown sort key: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeopleQuery {
    pub name: Option<String>,
    pub min_photos: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonStats {
    pub total_people: usize,
    pub labeled_people: usize,
    pub unlabeled_clusters: usize,
    pub total_faces: usize,
    pub average_photos_per_person: f64,
}

impl fmt::Display for PersonStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "people:           {}", self.total_people)?;
        writeln!(f, "  labeled:        {}", self.labeled_people)?;
        writeln!(f, "  unlabeled:      {}", self.unlabeled_clusters)?;
        writeln!(f, "faces:            {}", self.total_faces)?;
        write!(f, "photos per person: {:.2}", self.average_photos_per_person)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeCandidate<'a> {
    pub first: &'a PersonCluster,
    pub second: &'a PersonCluster,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitCandidate<'a> {
    pub cluster: &'a PersonCluster,
    pub internal_similarity: f64,
}

/// Read-only queries over a snapshot of people: search, statistics and
/// correction suggestions.
pub struct SearchService<M = CosineSimilarity> {
    metric: M,
}

impl SearchService<CosineSimilarity> {
    pub fn cosine() -> Self {
        Self::new(CosineSimilarity::new())
    }
}

impl<M: SimilarityMetric> SearchService<M> {
    pub fn new(metric: M) -> Self {
        Self { metric }
    }

    pub fn search_people<'a, S: LabelStore>(
        &self,
        clusters: &'a [PersonCluster],
        labels: &PersonIdentityStore<S>,
        query: &PeopleQuery,
    ) -> Result<Vec<&'a PersonCluster>, StoreError> {
        let needle = query
            .name
            .as_deref()
            .map(str::to_lowercase)
            .filter(|n| !n.is_empty());

        let mut matches: Vec<(&PersonCluster, String)> = Vec::new();
        for cluster in clusters {
            if cluster.photo_count() < query.min_photos {
                continue;
            }
            let name = labels.name_of(&cluster.id)?;
            if let Some(needle) = &needle {
                match &name {
                    Some(n) if n.to_lowercase().contains(needle.as_str()) => {}
                    _ => continue,
                }
            }
            matches.push((cluster, name.unwrap_or_default()));
        }

        // sort_by is stable; descending flips the comparator so ties keep input order
        matches.sort_by(|(a, a_name), (b, b_name)| {
            let ordering = match query.sort_by {
                SortBy::Name => a_name.to_lowercase().cmp(&b_name.to_lowercase()),
                SortBy::PhotoCount => a.photo_count().cmp(&b.photo_count()),
                SortBy::Confidence => a
                    .confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(Ordering::Equal),
                SortBy::LastSeen => a.last_seen().cmp(&b.last_seen()),
            };
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(matches.into_iter().map(|(cluster, _)| cluster).collect())
    }

    pub fn get_person_stats<S: LabelStore>(
        &self,
        clusters: &[PersonCluster],
        labels: &PersonIdentityStore<S>,
    ) -> Result<PersonStats, StoreError> {
        let total_people = clusters.len();
        let mut labeled_people = 0;
        for cluster in clusters {
            if labels.get_person_label(&cluster.id)?.is_some() {
                labeled_people += 1;
            }
        }
        let total_faces = clusters.iter().map(PersonCluster::face_count).sum();
        let total_photos: usize = clusters.iter().map(PersonCluster::photo_count).sum();

        Ok(PersonStats {
            total_people,
            labeled_people,
            unlabeled_clusters: total_people - labeled_people,
            total_faces,
            // NaN for an empty library
            average_photos_per_person: total_photos as f64 / total_people as f64,
        })
    }

    /// Mean similarity over every cross pair of embedding-bearing faces.
    pub fn cross_similarity(
        &self,
        first: &PersonCluster,
        second: &PersonCluster,
    ) -> Result<Option<f64>, SimilarityError> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for a in first.embedded_faces() {
            for b in second.embedded_faces() {
                sum += self.metric.compare(&a.embedding, &b.embedding)?;
                count += 1;
            }
        }
        Ok((count > 0).then(|| sum / count as f64))
    }

    /// Mean similarity over every pair of embedding-bearing faces within a cluster.
    pub fn internal_similarity(
        &self,
        cluster: &PersonCluster,
    ) -> Result<Option<f64>, SimilarityError> {
        let faces: Vec<&Face> = cluster.embedded_faces().collect();
        let mut sum = 0.0;
        let mut count = 0usize;
        for (i, a) in faces.iter().enumerate() {
            for b in &faces[i + 1..] {
                sum += self.metric.compare(&a.embedding, &b.embedding)?;
                count += 1;
            }
        }
        Ok((count > 0).then(|| sum / count as f64))
    }

    /// Pairs of people that look like the same person, most similar first.
    ///
    /// Pairs already labeled with two different names are never suggested.
    pub fn suggest_merge_candidates<'a, S: LabelStore>(
        &self,
        clusters: &'a [PersonCluster],
        labels: &PersonIdentityStore<S>,
        threshold: f64,
    ) -> Result<Vec<MergeCandidate<'a>>, SearchError> {
        let names = clusters
            .iter()
            .map(|c| labels.name_of(&c.id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut candidates = Vec::new();
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                if let (Some(a), Some(b)) = (&names[i], &names[j]) {
                    if a != b {
                        continue;
                    }
                }
                let Some(similarity) = self.cross_similarity(&clusters[i], &clusters[j])? else {
                    continue;
                };
                if similarity >= threshold {
                    candidates.push(MergeCandidate {
                        first: &clusters[i],
                        second: &clusters[j],
                        similarity,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        Ok(candidates)
    }

    /// People whose faces disagree with each other, least confident first.
    pub fn suggest_split_candidates<'a>(
        &self,
        clusters: &'a [PersonCluster],
        min_faces_for_split: usize,
        max_internal_similarity: f64,
    ) -> Result<Vec<SplitCandidate<'a>>, SimilarityError> {
        let mut candidates = Vec::new();
        for cluster in clusters {
            if cluster.face_count() < min_faces_for_split {
                continue;
            }
            if let Some(internal_similarity) = self.internal_similarity(cluster)? {
                if internal_similarity < max_internal_similarity {
                    candidates.push(SplitCandidate {
                        cluster,
                        internal_similarity,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.cluster
                .confidence
                .partial_cmp(&b.cluster.confidence)
                .unwrap_or(Ordering::Equal)
        });
        Ok(candidates)
    }

    /// The face best suited as the person's portrait.
    pub fn get_best_representative_face<'a>(
        &self,
        cluster: &'a PersonCluster,
    ) -> Option<&'a Face> {
        let mut best: Option<(&Face, f64)> = None;
        for face in &cluster.faces {
            let score = representative_score(face);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((face, score));
            }
        }
        best.map(|(face, _)| face)
    }
}

fn representative_score(face: &Face) -> f64 {
    let mut score = face.confidence;
    if let Some(attributes) = &face.attributes {
        if attributes.smile.is_some_and(|s| s > 0.5) {
            score += 0.1;
        }
        if attributes.eyes_open.is_some_and(|e| e > 0.8) {
            score += 0.1;
        }
    }
    if face.bounding_box.area() > LARGE_FACE_AREA_FRACTION {
        score += 0.1;
    }
    score.min(1.0)
}
