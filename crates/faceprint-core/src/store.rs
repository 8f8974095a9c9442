//! Identity persistence contract.
//!
//! The pipeline only ever inserts complete identities and reads them back;
//! stored signatures are never modified.

use crate::types::RegisteredIdentity;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity already exists: {0}")]
    DuplicateId(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// CRUD access to registered identities.
pub trait IdentityStore: Send + Sync {
    /// Persist a new identity. Fails with [`StoreError::DuplicateId`] if the id exists.
    fn insert(&self, identity: &RegisteredIdentity) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<RegisteredIdentity>, StoreError>;

    /// All identities, oldest registration first.
    fn list(&self) -> Result<Vec<RegisteredIdentity>, StoreError>;

    /// Delete by id. Returns whether a record was removed.
    fn remove(&self, id: &str) -> Result<bool, StoreError>;

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.list()?.len())
    }
}

/// Process-local store, mainly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: Mutex<Vec<RegisteredIdentity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryStore {
    fn insert(&self, identity: &RegisteredIdentity) -> Result<(), StoreError> {
        let mut identities = self.identities.lock().unwrap_or_else(PoisonError::into_inner);
        if identities.iter().any(|i| i.id == identity.id) {
            return Err(StoreError::DuplicateId(identity.id.clone()));
        }
        identities.push(identity.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<RegisteredIdentity>, StoreError> {
        let identities = self.identities.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(identities.iter().find(|i| i.id == id).cloned())
    }

    fn list(&self) -> Result<Vec<RegisteredIdentity>, StoreError> {
        let identities = self.identities.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all = identities.clone();
        // Stable sort keeps insertion order for equal timestamps.
        all.sort_by_key(|i| i.created_at);
        Ok(all)
    }

    fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let mut identities = self.identities.lock().unwrap_or_else(PoisonError::into_inner);
        let before = identities.len();
        identities.retain(|i| i.id != id);
        Ok(identities.len() != before)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.identities.lock().unwrap_or_else(PoisonError::into_inner).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signature;
    use chrono::{Duration, Utc};

    fn identity(id: &str, age_secs: i64) -> RegisteredIdentity {
        RegisteredIdentity {
            id: id.into(),
            name: format!("user {id}"),
            signature: Signature::new(vec![1.0, 0.0]),
            photo_ref: None,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let store = MemoryStore::new();
        store.insert(&identity("a", 0)).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().name, "user a");
        assert!(store.get("missing").unwrap().is_none());
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_rejected() {
        let store = MemoryStore::new();
        store.insert(&identity("a", 0)).unwrap();
        let err = store.insert(&identity("a", 5)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == "a"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_list_oldest_first() {
        let store = MemoryStore::new();
        store.insert(&identity("new", 1)).unwrap();
        store.insert(&identity("old", 100)).unwrap();
        let ids: Vec<String> = store.list().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["old", "new"]);
    }
}
