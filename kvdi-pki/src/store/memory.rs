use super::{ObjectKey, Secret, SecretMeta, SecretStore};
use crate::codec::BundleMap;
use crate::error::{PkiError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Mutex, PoisonError};

/// A mutation recorded by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Create(ObjectKey),
    Update(ObjectKey),
    Delete(ObjectKey),
}

/// In-process secret store.
///
/// Keeps a journal of every write so callers can assert exactly which
/// mutations a reconcile pass performed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: DashMap<ObjectKey, Secret>,
    journal: Mutex<Vec<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a secret directly, bypassing the journal.
    pub fn insert_raw(&self, secret: Secret) {
        self.secrets.insert(secret.key.clone(), secret);
    }

    /// Remove a secret directly, bypassing the journal.
    pub fn remove_raw(&self, key: &ObjectKey) -> Option<Secret> {
        self.secrets.remove(key).map(|(_, secret)| secret)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.secrets.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Every write performed through the [`SecretStore`] interface, in order.
    pub fn journal(&self) -> Vec<StoreOp> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget the recorded writes.
    pub fn clear_journal(&self) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Delete every secret owned by the resource with this UID.
    ///
    /// Returns the number of secrets removed.
    pub fn delete_owned_by(&self, uid: &str) -> usize {
        let owned: Vec<ObjectKey> = self
            .secrets
            .iter()
            .filter(|entry| entry.meta.is_owned_by(uid))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &owned {
            self.secrets.remove(key);
            self.record(StoreOp::Delete(key.clone()));
        }
        owned.len()
    }

    fn record(&self, op: StoreOp) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Secret>> {
        Ok(self.secrets.get(key).map(|entry| entry.value().clone()))
    }

    async fn create(&self, secret: Secret) -> Result<()> {
        let key = secret.key.clone();
        match self.secrets.entry(key.clone()) {
            Entry::Occupied(_) => return Err(PkiError::AlreadyExists(key.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(secret);
            }
        }
        self.record(StoreOp::Create(key));
        Ok(())
    }

    async fn update(&self, key: &ObjectKey, data: BundleMap) -> Result<()> {
        if data.is_empty() {
            self.secrets.remove(key);
        } else {
            self.secrets
                .entry(key.clone())
                .and_modify(|secret| secret.data = data.clone())
                .or_insert_with(|| Secret {
                    key: key.clone(),
                    meta: SecretMeta::default(),
                    data: data.clone(),
                });
        }
        self.record(StoreOp::Update(key.clone()));
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.secrets.remove(key);
        self.record(StoreOp::Delete(key.clone()));
        Ok(())
    }
}
