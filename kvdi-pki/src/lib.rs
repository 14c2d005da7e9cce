//! Internal mTLS PKI of a kVDI cluster.
//!
//! Owns a per-cluster root CA and the leaf certificates the app and the
//! desktop sessions use to authenticate each other. All material lives in a
//! [`SecretStore`]; the reconcile operations on [`PkiManager`] converge it.

pub mod ca;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod dns;
mod error;
pub mod manager;
mod metadata;
pub mod outcome;
pub mod profile;
pub mod store;
pub mod verify;

pub use ca::{CertificateAuthority, IssuedCertificate};
pub use cluster::{Session, VdiCluster};
pub use codec::{BundleMap, DecodedBundle, decode_bundle, encode_bundle};
pub use config::PkiConfig;
pub use error::{PkiError, Result};
pub use manager::PkiManager;
pub use metadata::{CertMetadata, sha256_fingerprint};
pub use outcome::{Reconciled, Requeue};
pub use profile::{AppRole, CaProfile, CertProfile};
pub use store::{FileStore, MemoryStore, ObjectKey, Secret, SecretMeta, SecretStore, StoreOp};
pub use verify::{verify_client_cert, verify_server_cert};
