use crate::core::clusterer::ClusterError;
use crate::core::face::{PersonCluster, PersonLabel};
use crate::core::resolver::{IdentityResolver, SplitOptions};
use crate::core::similarity::{CosineSimilarity, SimilarityMetric};
use crate::services::identity::PersonIdentityStore;
use crate::services::label_store::{LabelStore, MemoryLabelStore, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeopleError {
    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Label store error: {0}")]
    Store(#[from] StoreError),
}

/// User-facing corrections: merge and split people while keeping their
/// labels in step.
pub struct PeopleService<M = CosineSimilarity, S = MemoryLabelStore> {
    resolver: IdentityResolver<M>,
    identities: PersonIdentityStore<S>,
}

impl<M: SimilarityMetric + Sync, S: LabelStore> PeopleService<M, S> {
    pub fn new(resolver: IdentityResolver<M>, identities: PersonIdentityStore<S>) -> Self {
        Self {
            resolver,
            identities,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver<M> {
        &self.resolver
    }

    pub fn identities(&self) -> &PersonIdentityStore<S> {
        &self.identities
    }

    pub fn identities_mut(&mut self) -> &mut PersonIdentityStore<S> {
        &mut self.identities
    }

    pub fn label_of(&self, cluster: &PersonCluster) -> Result<Option<PersonLabel>, StoreError> {
        self.identities.get_person_label(&cluster.id)
    }

    pub fn merge_people(
        &mut self,
        first: &PersonCluster,
        second: &PersonCluster,
        new_name: Option<&str>,
    ) -> Result<PersonCluster, PeopleError> {
        let mut merged = self.resolver.merge_clusters(first, second);
        let label = self
            .identities
            .apply_merge(&first.id, &second.id, &merged.id, new_name)?;
        merged.label_id = label.map(|l| l.id);
        log::info!("Merged {} and {} into {}", first.id, second.id, merged.id);
        Ok(merged)
    }

    /// Split a person; labels are only touched when the split produced
    /// more than one fragment.
    pub fn split_person(
        &mut self,
        cluster: &PersonCluster,
        options: &SplitOptions,
        names: Option<&[String]>,
    ) -> Result<Vec<PersonCluster>, PeopleError> {
        let mut fragments = self.resolver.split_cluster(cluster, options)?;
        if fragments.len() < 2 {
            return Ok(fragments);
        }

        let labels = self.identities.apply_split(&cluster.id, &fragments, names)?;
        for fragment in &mut fragments {
            fragment.label_id = labels
                .iter()
                .find(|l| l.cluster_id == fragment.id)
                .map(|l| l.id.clone());
        }
        Ok(fragments)
    }
}
