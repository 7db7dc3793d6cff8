use crate::core::clusterer::ClusterOptions;
use crate::core::resolver::DEFAULT_SPLIT_THRESHOLD_DELTA;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Could not find home directory")]
    NoHomeDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub clustering: ClusterOptions,
    /// Minimum mean similarity for a new face to join an existing person
    pub assignment_threshold: f64,
    pub split_threshold_delta: f64,
    pub merge_suggestion_threshold: f64,
    pub split_suggestion_min_faces: usize,
    pub split_suggestion_max_similarity: f64,
    pub store_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clustering: ClusterOptions::default(),
            assignment_threshold: 0.6,
            split_threshold_delta: DEFAULT_SPLIT_THRESHOLD_DELTA,
            merge_suggestion_threshold: 0.7,
            split_suggestion_min_faces: 4,
            split_suggestion_max_similarity: 0.65,
            store_path: None,
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("clustering.similarityThreshold", self.clustering.similarity_threshold),
            ("assignmentThreshold", self.assignment_threshold),
            ("mergeSuggestionThreshold", self.merge_suggestion_threshold),
            ("splitSuggestionMaxSimilarity", self.split_suggestion_max_similarity),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 0..=1, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.split_threshold_delta) {
            return Err(ConfigError::Invalid(format!(
                "splitThresholdDelta must be within 0..=1, got {}",
                self.split_threshold_delta
            )));
        }
        if self.clustering.min_cluster_size == 0 || self.clustering.max_clusters == 0 {
            return Err(ConfigError::Invalid(
                "clustering sizes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Label database location: the configured path or
    /// `~/Documents/Personrs/labels.db`.
    pub fn resolve_store_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.store_path {
            return Ok(path.clone());
        }
        let home_dir = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home_dir.join("Documents").join("Personrs").join("labels.db"))
    }
}
