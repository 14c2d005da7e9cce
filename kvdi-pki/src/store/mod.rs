//! Persistence contract for certificate bundles.
//!
//! The PKI externalizes everything it owns to a namespaced key-value secret
//! store. Only four operations are needed, all of which complete or fail
//! promptly; the store is never locked by this crate.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, StoreOp};

use crate::cluster::OwnerReference;
use crate::codec::BundleMap;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Address of a secret: its name within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub name: String,
    pub namespace: String,
}

impl ObjectKey {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMeta {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
}

impl SecretMeta {
    /// Whether the owner with this UID cascades deletion onto the secret.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|owner| owner.uid == uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub key: ObjectKey,
    pub meta: SecretMeta,
    pub data: BundleMap,
}

impl Secret {
    pub fn new(key: ObjectKey, data: BundleMap) -> Self {
        Self {
            key,
            meta: SecretMeta::default(),
            data,
        }
    }

    pub fn with_meta(mut self, meta: SecretMeta) -> Self {
        self.meta = meta;
        self
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret, `None` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Secret>>;

    /// Create a new secret. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, secret: Secret) -> Result<()>;

    /// Overwrite (or create) the data of a secret.
    ///
    /// Writing an empty map removes the secret: it is the signal that the
    /// material no longer exists.
    async fn update(&self, key: &ObjectKey, data: BundleMap) -> Result<()>;

    /// Delete a secret. Deleting a missing secret is not an error.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}
