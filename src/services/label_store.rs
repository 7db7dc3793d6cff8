use crate::core::face::PersonLabel;
use sled::Db;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Label database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key-value storage for person labels, keyed by cluster id.
///
/// Writers take `&mut self`; share a store between threads behind a mutex.
pub trait LabelStore {
    fn get(&self, cluster_id: &str) -> Result<Option<PersonLabel>, StoreError>;

    fn put(&mut self, cluster_id: &str, label: &PersonLabel) -> Result<(), StoreError>;

    /// Returns whether a label was present
    fn delete(&mut self, cluster_id: &str) -> Result<bool, StoreError>;

    fn list(&self) -> Result<Vec<PersonLabel>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryLabelStore {
    labels: HashMap<String, PersonLabel>,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LabelStore for MemoryLabelStore {
    fn get(&self, cluster_id: &str) -> Result<Option<PersonLabel>, StoreError> {
        Ok(self.labels.get(cluster_id).cloned())
    }

    fn put(&mut self, cluster_id: &str, label: &PersonLabel) -> Result<(), StoreError> {
        self.labels.insert(cluster_id.to_string(), label.clone());
        Ok(())
    }

    fn delete(&mut self, cluster_id: &str) -> Result<bool, StoreError> {
        Ok(self.labels.remove(cluster_id).is_some())
    }

    fn list(&self) -> Result<Vec<PersonLabel>, StoreError> {
        Ok(self.labels.values().cloned().collect())
    }
}

/// Labels persisted in a sled database, one JSON document per cluster id.
pub struct SledLabelStore {
    db: Db,
}

impl SledLabelStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

impl LabelStore for SledLabelStore {
    fn get(&self, cluster_id: &str) -> Result<Option<PersonLabel>, StoreError> {
        match self.db.get(cluster_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, cluster_id: &str, label: &PersonLabel) -> Result<(), StoreError> {
        let value = serde_json::to_vec(label)?;
        self.db.insert(cluster_id, value)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete(&mut self, cluster_id: &str) -> Result<bool, StoreError> {
        let removed = self.db.remove(cluster_id)?.is_some();
        self.db.flush()?;
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<PersonLabel>, StoreError> {
        let mut labels = Vec::new();
        for entry in self.db.iter() {
            let (key, value) = entry?;
            match serde_json::from_slice::<PersonLabel>(&value) {
                Ok(label) => labels.push(label),
                Err(e) => log::warn!(
                    "Skipping malformed label entry {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(labels)
    }
}
