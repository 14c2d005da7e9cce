//! Reconcile entry points for the cluster PKI.
//!
//! A [`PkiManager`] is bound to one VDICluster. Every call reads the current
//! state from the store, converges it one step and reports either the ready
//! value or a requeue. Nothing is cached between calls.

use crate::ca::CertificateAuthority;
use crate::cluster::{Session, VdiCluster};
use crate::codec::{self, BundleMap, CA_CERT_KEY, TLS_CERT_KEY, TLS_KEY_KEY};
use crate::config::PkiConfig;
use crate::error::{PkiError, Result};
use crate::metadata;
use crate::outcome::{APP_CERT_REQUEUE_AFTER, CA_REQUEUE_AFTER, Reconciled};
use crate::profile::{AppRole, CaProfile, CertProfile};
use crate::store::{ObjectKey, Secret, SecretMeta, SecretStore};
use crate::verify;
use std::net::IpAddr;
use std::sync::Arc;

pub struct PkiManager<S: SecretStore + ?Sized> {
    store: Arc<S>,
    cluster: VdiCluster,
    config: PkiConfig,
}

impl<S: SecretStore + ?Sized> PkiManager<S> {
    pub fn new(store: Arc<S>, cluster: VdiCluster, config: PkiConfig) -> Self {
        Self {
            store,
            cluster,
            config,
        }
    }

    pub fn cluster(&self) -> &VdiCluster {
        &self.cluster
    }

    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn ca_key(&self) -> ObjectKey {
        ObjectKey::new(self.cluster.ca_name(), self.cluster.core_namespace())
    }

    /// Ensure the cluster root CA exists and is readable, and return it.
    ///
    /// A missing CA is generated and stored. A CA bundle that fails to decode,
    /// or whose key cannot be loaded for signing, is wiped and the caller is
    /// asked to come back shortly, at which point a fresh CA will be
    /// generated. The private key is not checked against the certificate's
    /// public key.
    pub async fn reconcile_ca(&self) -> Result<Reconciled<CertificateAuthority>> {
        let key = self.ca_key();

        let secret = match self.store.get(&key).await? {
            Some(secret) => secret,
            None => {
                tracing::info!(ca = %key, "Generating new PKI");
                let ca = CertificateAuthority::new_root(
                    &CaProfile::for_cluster(&self.cluster),
                    self.config.key_size,
                )?;
                self.store.update(&key, ca.to_bundle()?).await?;
                tracing::info!(
                    ca = %key,
                    fingerprint = %metadata::sha256_fingerprint(ca.cert_der()),
                    "Stored new root CA"
                );
                return Ok(Reconciled::Ready(ca));
            }
        };

        // A bundle that decodes but cannot be loaded for signing is as corrupt
        // as one that does not decode
        match codec::decode_bundle(&secret.data).and_then(CertificateAuthority::from_bundle) {
            Ok(ca) => {
                tracing::debug!(
                    ca = %key,
                    fingerprint = %metadata::sha256_fingerprint(ca.cert_der()),
                    "Loaded existing CA"
                );
                Ok(Reconciled::Ready(ca))
            }
            Err(e) => {
                tracing::warn!(ca = %key, error = %e, "Pre-existing CA is corrupted, wiping it");
                self.store.update(&key, BundleMap::new()).await?;
                Ok(Reconciled::requeue(
                    format!("Pre-existing CA was corrupted, recreating PKI: {e}"),
                    CA_REQUEUE_AFTER,
                ))
            }
        }
    }

    /// Ensure the app server and client bundles exist and verify against
    /// the live CA.
    ///
    /// The server bundle is skipped when the cluster names an external
    /// server secret. The first invalid bundle is deleted and aborts the
    /// pass with a requeue.
    pub async fn reconcile_app_certificates(
        &self,
        ca: &CertificateAuthority,
    ) -> Result<Reconciled<()>> {
        let mut roles = Vec::with_capacity(2);
        if self.cluster.app_is_using_external_server_tls() {
            tracing::debug!(
                secret = %self.cluster.app_server_tls_secret_name(),
                "App uses an external server certificate, skipping"
            );
        } else {
            roles.push(AppRole::Server);
        }
        roles.push(AppRole::Client);

        for role in roles {
            if let Reconciled::Requeue(requeue) = self.reconcile_app_certificate(ca, role).await? {
                return Ok(Reconciled::Requeue(requeue));
            }
        }
        Ok(Reconciled::Ready(()))
    }

    async fn reconcile_app_certificate(
        &self,
        ca: &CertificateAuthority,
        role: AppRole,
    ) -> Result<Reconciled<()>> {
        let name = match role {
            AppRole::Server => self.cluster.app_server_tls_secret_name(),
            AppRole::Client => self.cluster.app_client_tls_secret_name(),
        };
        let key = ObjectKey::new(name, self.cluster.core_namespace());

        match self.store.get(&key).await? {
            None => {
                tracing::info!(secret = %key, %role, "Generating new app certificate");
                let profile =
                    CertProfile::for_app(role, &self.cluster, &self.config.cluster_suffix);
                let issued = ca.issue(&profile, self.config.key_size)?;
                let meta = SecretMeta {
                    labels: self.cluster.component_labels("app"),
                    annotations: self.cluster.annotations(),
                    owner_references: self.cluster.owner_references(),
                };
                self.store
                    .create(Secret::new(key, ca.bundle_for(&issued)?).with_meta(meta))
                    .await?;
                Ok(Reconciled::Ready(()))
            }
            Some(secret) => {
                let app_name = self.cluster.app_name();
                match check_app_bundle(&secret.data, ca, role, &app_name) {
                    Ok(()) => {
                        tracing::debug!(secret = %key, %role, "App certificate is valid");
                        Ok(Reconciled::Ready(()))
                    }
                    Err(reason) => {
                        tracing::warn!(secret = %key, %role, %reason, "Deleting invalid app certificate");
                        self.store.delete(&key).await?;
                        Ok(Reconciled::requeue(
                            format!("Need to recreate app certificate: {reason}"),
                            APP_CERT_REQUEUE_AFTER,
                        ))
                    }
                }
            }
        }
    }

    /// Converge the CA and then the app certificates.
    pub async fn reconcile(&self) -> Result<Reconciled<()>> {
        let ca = match self.reconcile_ca().await? {
            Reconciled::Ready(ca) => ca,
            Reconciled::Requeue(requeue) => return Ok(Reconciled::Requeue(requeue)),
        };
        self.reconcile_app_certificates(&ca).await
    }

    /// Ensure a desktop session has its server bundle.
    ///
    /// An existing bundle is left untouched, it is never re-verified.
    pub async fn reconcile_session(
        &self,
        session: &Session,
        service_ip: &str,
    ) -> Result<Reconciled<()>> {
        let ca = match self.reconcile_ca().await? {
            Reconciled::Ready(ca) => ca,
            Reconciled::Requeue(requeue) => return Ok(Reconciled::Requeue(requeue)),
        };

        let key = ObjectKey::new(session.name(), session.namespace());
        if self.store.get(&key).await?.is_some() {
            tracing::debug!(secret = %key, "Session certificate already exists");
            return Ok(Reconciled::Ready(()));
        }

        let ip: IpAddr = service_ip
            .parse()
            .map_err(|_| PkiError::InvalidServiceIp(service_ip.to_string()))?;

        tracing::info!(secret = %key, %ip, "Generating new session certificate");
        let profile = CertProfile::session(session, ip, &self.config.cluster_suffix);
        let issued = ca.issue(&profile, self.config.key_size)?;
        let meta = SecretMeta {
            labels: session.desktop_labels(&self.cluster),
            annotations: session.annotations(),
            owner_references: session.owner_references(),
        };
        self.store
            .create(Secret::new(key, ca.bundle_for(&issued)?).with_meta(meta))
            .await?;
        Ok(Reconciled::Ready(()))
    }
}

/// Check a stored app bundle against the live CA, returning the reason it
/// has to be recreated.
fn check_app_bundle(
    data: &BundleMap,
    ca: &CertificateAuthority,
    role: AppRole,
    app_name: &str,
) -> std::result::Result<(), String> {
    if data.is_empty() {
        return Err("secret data is empty".to_string());
    }

    let ca_pem = data
        .get(CA_CERT_KEY)
        .ok_or_else(|| PkiError::MissingKey(CA_CERT_KEY).to_string())?;
    let ca_der = codec::decode_certificate(CA_CERT_KEY, ca_pem).map_err(|e| e.to_string())?;
    if ca_der != ca.cert_der() {
        return Err("stored CA does not match live CA".to_string());
    }

    let cert_pem = data
        .get(TLS_CERT_KEY)
        .ok_or_else(|| PkiError::MissingKey(TLS_CERT_KEY).to_string())?;
    let cert_der = codec::decode_certificate(TLS_CERT_KEY, cert_pem).map_err(|e| e.to_string())?;

    let key_pem = data
        .get(TLS_KEY_KEY)
        .ok_or_else(|| PkiError::MissingKey(TLS_KEY_KEY).to_string())?;
    codec::decode_private_key(TLS_KEY_KEY, key_pem).map_err(|e| e.to_string())?;

    let verified = match role {
        AppRole::Server => verify::verify_server_cert(&cert_der, &ca_der, app_name),
        AppRole::Client => verify::verify_client_cert(&cert_der, &ca_der, app_name),
    };
    verified.map_err(|e| format!("certificate verification failed: {e}"))
}
