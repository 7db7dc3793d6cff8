use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("A person cluster must contain at least one face")]
    EmptyCluster,
}

/// Face rectangle, normalized to the photo (all values in 0..=1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Fraction of the photo covered by the face
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmark {
    pub kind: String, // e.g. "leftEye", "noseTip"
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceAttributes {
    pub smile: Option<f64>,
    pub eyes_open: Option<f64>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub emotion: Option<String>,
}

/// A detected face as delivered by the external detector/recognizer.
///
/// An empty `embedding` means the recognizer could not produce one; such faces
/// are kept around but never take part in identity decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Face {
    pub id: String,
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    pub confidence: f64,
    #[serde(default)]
    pub attributes: Option<FaceAttributes>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Face {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            bounding_box: BoundingBox::default(),
            landmarks: Vec::new(),
            confidence,
            attributes: None,
            embedding,
        }
    }

    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub faces: Vec<Face>,
}

impl Photo {
    pub fn new(id: impl Into<String>, path: impl Into<String>, faces: Vec<Face>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            taken_at: None,
            faces,
        }
    }

    pub fn contains_face(&self, face_id: &str) -> bool {
        self.faces.iter().any(|f| f.id == face_id)
    }
}

/// One materialized person: a non-empty set of faces judged to share an identity.
///
/// Clusters are treated as values. Operations that change membership return a
/// new `PersonCluster` and leave their inputs untouched. The human-readable
/// name lives in the identity store and is looked up by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonCluster {
    pub id: String,
    #[serde(default)]
    pub label_id: Option<String>,
    pub faces: Vec<Face>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersonCluster {
    pub fn new(faces: Vec<Face>, confidence: f64) -> Result<Self, IdentityError> {
        Self::with_id(new_cluster_id(), faces, confidence)
    }

    pub fn with_id(
        id: impl Into<String>,
        faces: Vec<Face>,
        confidence: f64,
    ) -> Result<Self, IdentityError> {
        if faces.is_empty() {
            return Err(IdentityError::EmptyCluster);
        }

        let now = Utc::now();
        Ok(Self {
            id: id.into(),
            label_id: None,
            faces,
            photos: Vec::new(),
            confidence,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn photo_count(&self) -> usize {
        self.photos.len()
    }

    pub fn contains_face(&self, face_id: &str) -> bool {
        self.faces.iter().any(|f| f.id == face_id)
    }

    /// Faces that can take part in similarity computations
    pub fn embedded_faces(&self) -> impl Iterator<Item = &Face> {
        self.faces.iter().filter(|f| f.has_embedding())
    }

    /// Latest capture time among linked photos, or the last update when no
    /// linked photo carries a timestamp.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.photos
            .iter()
            .filter_map(|p| p.taken_at)
            .max()
            .unwrap_or(self.updated_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonLabel {
    pub id: String,
    pub name: String,
    pub cluster_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersonLabel {
    pub fn new(cluster_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("label_{}", Uuid::new_v4().simple()),
            name: name.into(),
            cluster_id: cluster_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn new_cluster_id() -> String {
    format!("person_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_cluster_rejected() {
        let result = PersonCluster::new(Vec::new(), 0.9);
        assert_eq!(result.unwrap_err(), IdentityError::EmptyCluster);
    }

    #[test]
    fn test_cluster_ids_are_unique() {
        let a = PersonCluster::new(vec![Face::new("f1", vec![1.0], 0.9)], 0.9).unwrap();
        let b = PersonCluster::new(vec![Face::new("f1", vec![1.0], 0.9)], 0.9).unwrap();
        assert!(a.id.starts_with("person_"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);
    }

    #[test]
    fn test_embedded_faces_skips_empty_embeddings() {
        let cluster = PersonCluster::new(
            vec![
                Face::new("f1", vec![1.0, 0.0], 0.9),
                Face::new("f2", Vec::new(), 0.8),
            ],
            0.9,
        )
        .unwrap();

        let ids: Vec<&str> = cluster.embedded_faces().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["f1"]);
    }

    #[test]
    fn test_last_seen_prefers_photo_timestamps() {
        let mut cluster =
            PersonCluster::new(vec![Face::new("f1", vec![1.0], 0.9)], 0.9).unwrap();
        assert_eq!(cluster.last_seen(), cluster.updated_at);

        let taken = cluster.updated_at - Duration::days(3);
        let mut photo = Photo::new("p1", "/photos/p1.jpg", Vec::new());
        photo.taken_at = Some(taken);
        cluster.photos.push(photo);
        cluster
            .photos
            .push(Photo::new("p2", "/photos/p2.jpg", Vec::new()));

        assert_eq!(cluster.last_seen(), taken);
    }

    #[test]
    fn test_face_deserializes_without_optional_fields() {
        let json = r#"{"id":"f1","confidence":0.75}"#;
        let face: Face = serde_json::from_str(json).unwrap();
        assert_eq!(face.id, "f1");
        assert!(!face.has_embedding());
        assert!(face.attributes.is_none());
        assert_eq!(face.bounding_box.area(), 0.0);
    }
}
