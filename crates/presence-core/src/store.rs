//! Enrolled-identity store with copy-on-read snapshots.
//!
//! The store owns every [`EnrolledIdentity`] and preserves insertion order,
//! which the matcher relies on for deterministic tie-breaking. A snapshot is
//! an immutable point-in-time copy: mutations after a snapshot is taken never
//! affect it, so an in-flight match always sees consistent data.

use crate::types::{DimensionMismatch, Embedding, EnrolledIdentity};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
}

/// In-memory store of enrolled identities, insertion-ordered.
///
/// All embeddings share one fixed dimension, checked on every write.
pub struct EmbeddingStore {
    dim: usize,
    entries: Vec<EnrolledIdentity>,
}

impl EmbeddingStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: Vec::new(),
        }
    }

    /// Rebuild a store from persisted entries, validating ids and dimensions.
    pub fn from_entries(dim: usize, entries: Vec<EnrolledIdentity>) -> Result<Self, StoreError> {
        let mut store = Self::new(dim);
        for entry in entries {
            store.add(entry)?;
        }
        Ok(store)
    }

    fn check_dim(&self, embedding: &Embedding) -> Result<(), StoreError> {
        if embedding.dim() != self.dim {
            return Err(DimensionMismatch {
                expected: self.dim,
                actual: embedding.dim(),
            }
            .into());
        }
        Ok(())
    }

    /// Enroll a new identity. Fails if the id is already present.
    pub fn add(&mut self, identity: EnrolledIdentity) -> Result<(), StoreError> {
        self.check_dim(&identity.embedding)?;
        if self.entries.iter().any(|e| e.id == identity.id) {
            return Err(StoreError::DuplicateIdentity(identity.id));
        }
        tracing::debug!(id = %identity.id, name = %identity.display_name, "identity enrolled");
        self.entries.push(identity);
        Ok(())
    }

    /// Replace the embedding of an enrolled identity (re-enrollment).
    pub fn update_embedding(&mut self, id: &str, embedding: Embedding) -> Result<(), StoreError> {
        self.check_dim(&embedding)?;
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::IdentityNotFound(id.to_string()))?;
        entry.embedding = embedding;
        Ok(())
    }

    /// Change the display name of an enrolled identity.
    pub fn update_display_name(&mut self, id: &str, display_name: String) -> Result<(), StoreError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::IdentityNotFound(id.to_string()))?;
        entry.display_name = display_name;
        Ok(())
    }

    /// Remove an enrolled identity, returning the removed record.
    pub fn remove(&mut self, id: &str) -> Result<EnrolledIdentity, StoreError> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| StoreError::IdentityNotFound(id.to_string()))?;
        Ok(self.entries.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&EnrolledIdentity> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// All entries in insertion order, for persistence flushes.
    pub fn entries(&self) -> &[EnrolledIdentity] {
        &self.entries
    }

    /// Take an immutable point-in-time snapshot for one matching operation.
    ///
    /// Copy-on-read: the snapshot is detached from the store, later
    /// mutations are not visible through it.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: Arc::from(self.entries.as_slice()),
        }
    }
}

/// Immutable, insertion-ordered view of the enrolled set.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Arc<[EnrolledIdentity]>,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &EnrolledIdentity> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&EnrolledIdentity> {
        self.entries.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, values: Vec<f32>) -> EnrolledIdentity {
        EnrolledIdentity {
            id: id.to_string(),
            display_name: format!("Person {id}"),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut store = EmbeddingStore::new(2);
        store.add(identity("a", vec![0.0, 1.0])).unwrap();
        let err = store.add(identity("a", vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentity(id) if id == "a"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_wrong_dimension_rejected() {
        let mut store = EmbeddingStore::new(2);
        let err = store.add(identity("a", vec![0.0, 1.0, 2.0])).unwrap_err();
        assert!(matches!(err, StoreError::Dimension(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_missing_fails() {
        let mut store = EmbeddingStore::new(2);
        let err = store
            .update_embedding("ghost", Embedding::new(vec![0.0, 1.0]))
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentityNotFound(_)));
    }

    #[test]
    fn test_remove_missing_fails() {
        let mut store = EmbeddingStore::new(2);
        assert!(matches!(
            store.remove("ghost"),
            Err(StoreError::IdentityNotFound(_))
        ));
    }

    #[test]
    fn test_update_replaces_embedding() {
        let mut store = EmbeddingStore::new(2);
        store.add(identity("a", vec![0.0, 1.0])).unwrap();
        store
            .update_embedding("a", Embedding::new(vec![1.0, 0.0]))
            .unwrap();
        assert_eq!(store.get("a").unwrap().embedding.values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_snapshot_isolated_from_mutations() {
        let mut store = EmbeddingStore::new(2);
        store.add(identity("a", vec![0.0, 1.0])).unwrap();
        let snapshot = store.snapshot();

        store.add(identity("b", vec![1.0, 0.0])).unwrap();
        store.remove("a").unwrap();
        store.add(identity("c", vec![0.5, 0.5])).unwrap();

        // Snapshot still shows exactly the state at capture time.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.iter().next().unwrap().id, "a");
        // Store moved on.
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let mut store = EmbeddingStore::new(1);
        for (i, id) in ["x", "y", "z"].iter().enumerate() {
            store.add(identity(id, vec![i as f32])).unwrap();
        }
        let snapshot = store.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_from_entries_validates() {
        let entries = vec![identity("a", vec![0.0]), identity("a", vec![1.0])];
        assert!(matches!(
            EmbeddingStore::from_entries(1, entries),
            Err(StoreError::DuplicateIdentity(_))
        ));
    }
}
