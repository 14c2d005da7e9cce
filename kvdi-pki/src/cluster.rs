//! Cluster and session descriptors consumed by the PKI.
//!
//! These mirror the parts of the `VDICluster` and `Session` resources that
//! the certificate lifecycle depends on. Every accessor is a pure lookup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VDI_CLUSTER_LABEL: &str = "vdiCluster";
pub const COMPONENT_LABEL: &str = "vdiComponent";
pub const USER_LABEL: &str = "desktopUser";
pub const DESKTOP_NAME_LABEL: &str = "desktopName";

pub const DEFAULT_NAMESPACE: &str = "default";

pub const VDI_CLUSTER_API_VERSION: &str = "app.kvdi.io/v1";
pub const VDI_CLUSTER_KIND: &str = "VDICluster";
pub const SESSION_API_VERSION: &str = "desktops.kvdi.io/v1";
pub const SESSION_KIND: &str = "Session";

/// Declares that the holder is deleted together with the referenced owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
    pub block_owner_deletion: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTlsConfig {
    /// Name of a user-supplied secret holding the app server certificate.
    #[serde(default)]
    pub server_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub tls: Option<AppTlsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VdiClusterSpec {
    #[serde(default)]
    pub app_namespace: Option<String>,
    #[serde(default)]
    pub app: Option<AppConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdiCluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: VdiClusterSpec,
}

impl VdiCluster {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            metadata: ObjectMeta {
                uid: format!("{name}-uid"),
                name,
                ..Default::default()
            },
            spec: VdiClusterSpec::default(),
        }
    }

    pub fn with_app_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.spec.app_namespace = Some(namespace.into());
        self
    }

    /// Use a user-supplied secret for the app server certificate.
    pub fn with_external_server_tls(mut self, secret: impl Into<String>) -> Self {
        self.spec.app = Some(AppConfig {
            tls: Some(AppTlsConfig {
                server_secret: secret.into(),
            }),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Namespace the app and the PKI material live in.
    pub fn core_namespace(&self) -> &str {
        match self.spec.app_namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => DEFAULT_NAMESPACE,
        }
    }

    pub fn signer_name(&self) -> String {
        format!("{}-mtls-signer.{}.svc", self.name(), self.core_namespace())
    }

    pub fn ca_name(&self) -> String {
        format!("{}-mtls-root-ca.{}.svc", self.name(), self.core_namespace())
    }

    pub fn app_name(&self) -> String {
        format!("{}-app", self.name())
    }

    fn external_server_secret(&self) -> Option<&str> {
        self.spec
            .app
            .as_ref()
            .and_then(|app| app.tls.as_ref())
            .map(|tls| tls.server_secret.as_str())
            .filter(|secret| !secret.is_empty())
    }

    pub fn app_is_using_external_server_tls(&self) -> bool {
        self.external_server_secret().is_some()
    }

    pub fn app_server_tls_secret_name(&self) -> String {
        match self.external_server_secret() {
            Some(secret) => secret.to_string(),
            None => format!("{}-server", self.app_name()),
        }
    }

    pub fn app_client_tls_secret_name(&self) -> String {
        format!("{}-client", self.app_name())
    }

    /// The cluster's own labels plus the cluster and component markers.
    pub fn component_labels(&self, component: &str) -> BTreeMap<String, String> {
        let mut labels = self.metadata.labels.clone();
        labels.insert(VDI_CLUSTER_LABEL.to_string(), self.name().to_string());
        labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
        labels
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.metadata.annotations.clone()
    }

    pub fn owner_references(&self) -> Vec<OwnerReference> {
        vec![OwnerReference {
            api_version: VDI_CLUSTER_API_VERSION.to_string(),
            kind: VDI_CLUSTER_KIND.to_string(),
            name: self.name().to_string(),
            uid: self.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: false,
        }]
    }
}

/// A single desktop session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub user: String,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            metadata: ObjectMeta {
                uid: format!("{name}-uid"),
                name,
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            user: user.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        match self.metadata.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => DEFAULT_NAMESPACE,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn desktop_labels(&self, cluster: &VdiCluster) -> BTreeMap<String, String> {
        let mut labels = self.metadata.labels.clone();
        labels.insert(USER_LABEL.to_string(), self.user.clone());
        labels.insert(VDI_CLUSTER_LABEL.to_string(), cluster.name().to_string());
        labels.insert(COMPONENT_LABEL.to_string(), "desktop".to_string());
        labels.insert(DESKTOP_NAME_LABEL.to_string(), self.name().to_string());
        labels
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.metadata.annotations.clone()
    }

    pub fn owner_references(&self) -> Vec<OwnerReference> {
        vec![OwnerReference {
            api_version: SESSION_API_VERSION.to_string(),
            kind: SESSION_KIND.to_string(),
            name: self.name().to_string(),
            uid: self.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: false,
        }]
    }
}
