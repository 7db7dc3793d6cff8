use crate::core::face::{PersonCluster, PersonLabel};
use crate::services::label_store::{LabelStore, MemoryLabelStore, StoreError};
use chrono::Utc;

/// Owner of all human-assigned person labels.
///
/// Labels are keyed by cluster id. Clusters only carry that id; names are
/// always resolved through this store. The merge and split cascades keep the
/// labels consistent with the identity set after corrections.
pub struct PersonIdentityStore<S = MemoryLabelStore> {
    store: S,
}

impl PersonIdentityStore<MemoryLabelStore> {
    pub fn in_memory() -> Self {
        Self::new(MemoryLabelStore::new())
    }
}

impl<S: LabelStore> PersonIdentityStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Name a person, or rename them if a label already exists.
    pub fn label_person(
        &mut self,
        cluster_id: &str,
        name: &str,
    ) -> Result<PersonLabel, StoreError> {
        let label = match self.store.get(cluster_id)? {
            Some(mut existing) => {
                existing.name = name.to_string();
                existing.updated_at = Utc::now();
                existing
            }
            None => PersonLabel::new(cluster_id, name),
        };
        self.store.put(cluster_id, &label)?;
        log::debug!("Labeled {} as {:?}", cluster_id, name);
        Ok(label)
    }

    pub fn unlabel_person(&mut self, cluster_id: &str) -> Result<bool, StoreError> {
        self.store.delete(cluster_id)
    }

    pub fn get_person_label(&self, cluster_id: &str) -> Result<Option<PersonLabel>, StoreError> {
        self.store.get(cluster_id)
    }

    pub fn name_of(&self, cluster_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.store.get(cluster_id)?.map(|l| l.name))
    }

    /// All labels, ordered by cluster id
    pub fn all_labels(&self) -> Result<Vec<PersonLabel>, StoreError> {
        let mut labels = self.store.list()?;
        labels.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
        Ok(labels)
    }

    /// Point each cluster's `label_id` at its current label, clearing it for
    /// unlabeled clusters. Returns how many clusters changed.
    pub fn sync_label_ids(&self, clusters: &mut [PersonCluster]) -> Result<usize, StoreError> {
        let mut changed = 0;
        for cluster in clusters.iter_mut() {
            let label_id = self.store.get(&cluster.id)?.map(|l| l.id);
            if cluster.label_id != label_id {
                cluster.label_id = label_id;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Retarget labels after two people were merged into `merged_id`.
    ///
    /// Both source labels go away. The merged person is named `new_name` if
    /// given, else after the first source, else after the second.
    pub fn apply_merge(
        &mut self,
        first_id: &str,
        second_id: &str,
        merged_id: &str,
        new_name: Option<&str>,
    ) -> Result<Option<PersonLabel>, StoreError> {
        let first = self.store.get(first_id)?;
        let second = self.store.get(second_id)?;
        self.store.delete(first_id)?;
        self.store.delete(second_id)?;

        let name = new_name
            .map(str::to_string)
            .or(first.map(|l| l.name))
            .or(second.map(|l| l.name));

        match name {
            Some(name) => self.label_person(merged_id, &name).map(Some),
            None => Ok(None),
        }
    }

    /// Retarget labels after `original_id` was split into `fragments`.
    ///
    /// With one name per fragment each fragment is labeled accordingly.
    /// Otherwise only the largest fragment inherits the original name.
    pub fn apply_split(
        &mut self,
        original_id: &str,
        fragments: &[PersonCluster],
        names: Option<&[String]>,
    ) -> Result<Vec<PersonLabel>, StoreError> {
        let original = self.store.get(original_id)?;
        self.store.delete(original_id)?;

        let mut labels = Vec::new();
        match names {
            Some(names) if names.len() == fragments.len() => {
                for (fragment, name) in fragments.iter().zip(names) {
                    labels.push(self.label_person(&fragment.id, name)?);
                }
            }
            _ => {
                if let Some(names) = names {
                    log::warn!(
                        "Got {} names for {} fragments of {}, falling back to inheritance",
                        names.len(),
                        fragments.len(),
                        original_id
                    );
                }
                let largest = fragments.iter().reduce(|best, candidate| {
                    if candidate.face_count() > best.face_count() {
                        candidate
                    } else {
                        best
                    }
                });
                if let (Some(label), Some(largest)) = (original, largest) {
                    labels.push(self.label_person(&largest.id, &label.name)?);
                }
            }
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::Face;

    fn fragment(id: &str, faces: usize) -> PersonCluster {
        let faces = (0..faces)
            .map(|i| Face::new(format!("{id}-f{i}"), vec![1.0], 0.9))
            .collect();
        PersonCluster::with_id(id, faces, 0.9).unwrap()
    }

    #[test]
    fn test_label_person_upserts() {
        let mut store = PersonIdentityStore::in_memory();
        let created = store.label_person("p1", "Alice").unwrap();
        assert_eq!(created.created_at, created.updated_at);

        let renamed = store.label_person("p1", "Alicia").unwrap();
        assert_eq!(renamed.id, created.id);
        assert_eq!(renamed.created_at, created.created_at);
        assert!(renamed.updated_at >= created.updated_at);
        assert_eq!(store.name_of("p1").unwrap().as_deref(), Some("Alicia"));
        assert_eq!(store.all_labels().unwrap().len(), 1);
    }

    #[test]
    fn test_unlabel_person() {
        let mut store = PersonIdentityStore::in_memory();
        store.label_person("p1", "Alice").unwrap();
        assert!(store.unlabel_person("p1").unwrap());
        assert!(!store.unlabel_person("p1").unwrap());
        assert!(store.get_person_label("p1").unwrap().is_none());
    }

    #[test]
    fn test_sync_label_ids_follows_store() {
        let mut store = PersonIdentityStore::in_memory();
        let mut clusters = vec![fragment("p1", 1), fragment("p2", 1)];
        clusters[1].label_id = Some("stale".to_string());

        let label = store.label_person("p1", "Alice").unwrap();
        assert_eq!(store.sync_label_ids(&mut clusters).unwrap(), 2);
        assert_eq!(clusters[0].label_id.as_deref(), Some(label.id.as_str()));
        assert!(clusters[1].label_id.is_none());
        assert_eq!(store.sync_label_ids(&mut clusters).unwrap(), 0);

        store.unlabel_person("p1").unwrap();
        assert_eq!(store.sync_label_ids(&mut clusters).unwrap(), 1);
        assert!(clusters[0].label_id.is_none());
    }

    #[test]
    fn test_merge_keeps_only_existing_name() {
        let mut store = PersonIdentityStore::in_memory();
        store.label_person("p2", "Alice").unwrap();

        let label = store.apply_merge("p1", "p2", "merged_p1_p2", None).unwrap();
        assert_eq!(label.unwrap().name, "Alice");
        assert_eq!(store.name_of("merged_p1_p2").unwrap().as_deref(), Some("Alice"));
        assert!(store.get_person_label("p1").unwrap().is_none());
        assert!(store.get_person_label("p2").unwrap().is_none());
    }

    #[test]
    fn test_merge_name_priority() {
        let mut store = PersonIdentityStore::in_memory();
        store.label_person("p1", "Alice").unwrap();
        store.label_person("p2", "Bob").unwrap();
        store.apply_merge("p1", "p2", "m1", None).unwrap();
        assert_eq!(store.name_of("m1").unwrap().as_deref(), Some("Alice"));

        store.label_person("p3", "Carol").unwrap();
        store.apply_merge("m1", "p3", "m2", Some("Alice C.")).unwrap();
        assert_eq!(store.name_of("m2").unwrap().as_deref(), Some("Alice C."));
        assert_eq!(store.all_labels().unwrap().len(), 1);
    }

    #[test]
    fn test_merge_of_unlabeled_people_stays_unlabeled() {
        let mut store = PersonIdentityStore::in_memory();
        assert!(store.apply_merge("p1", "p2", "m", None).unwrap().is_none());
        assert!(store.get_person_label("m").unwrap().is_none());
    }

    #[test]
    fn test_split_largest_fragment_inherits() {
        let mut store = PersonIdentityStore::in_memory();
        store.label_person("p1", "Alice").unwrap();
        let fragments = vec![fragment("p1_part1", 2), fragment("p1_part2", 5)];

        let labels = store.apply_split("p1", &fragments, None).unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].cluster_id, "p1_part2");
        assert!(store.get_person_label("p1").unwrap().is_none());
        assert!(store.get_person_label("p1_part1").unwrap().is_none());
    }

    #[test]
    fn test_split_with_names_labels_every_fragment() {
        let mut store = PersonIdentityStore::in_memory();
        let fragments = vec![fragment("a", 3), fragment("b", 1)];
        let names = vec!["Alice".to_string(), "Bob".to_string()];

        store.apply_split("p1", &fragments, Some(names.as_slice())).unwrap();
        assert_eq!(store.name_of("a").unwrap().as_deref(), Some("Alice"));
        assert_eq!(store.name_of("b").unwrap().as_deref(), Some("Bob"));
    }

    #[test]
    fn test_split_with_wrong_name_count_falls_back() {
        let mut store = PersonIdentityStore::in_memory();
        store.label_person("p1", "Alice").unwrap();
        let fragments = vec![fragment("a", 3), fragment("b", 3)];
        let names = vec!["Only one".to_string()];

        store.apply_split("p1", &fragments, Some(names.as_slice())).unwrap();
        // equal sizes: the first fragment wins
        assert_eq!(store.name_of("a").unwrap().as_deref(), Some("Alice"));
        assert!(store.name_of("b").unwrap().is_none());
    }

    #[test]
    fn test_split_of_unlabeled_person() {
        let mut store = PersonIdentityStore::in_memory();
        let fragments = vec![fragment("a", 3), fragment("b", 1)];
        assert!(store.apply_split("p1", &fragments, None).unwrap().is_empty());
    }
}
