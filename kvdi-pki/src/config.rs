use crate::ca::{self, DEFAULT_KEY_SIZE};
use crate::dns;

/// Tunables of the PKI.
///
/// # Environment variables
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | PKI_KEY_SIZE | 4096 | RSA modulus size of every generated key, 2048 to 8192 |
/// | CLUSTER_SUFFIX | from /etc/resolv.conf | Cluster DNS suffix, e.g. `cluster.local` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiConfig {
    /// RSA modulus size in bits
    pub key_size: usize,
    /// Cluster DNS suffix, empty when unknown
    pub cluster_suffix: String,
}

impl PkiConfig {
    /// Load configuration from the environment.
    ///
    /// The cluster suffix falls back to the resolver search path, and to an
    /// empty suffix when neither is available.
    pub fn from_env() -> Self {
        Self {
            key_size: std::env::var("PKI_KEY_SIZE")
                .ok()
                .and_then(|v| parse_key_size(&v))
                .unwrap_or(DEFAULT_KEY_SIZE),
            cluster_suffix: std::env::var("CLUSTER_SUFFIX")
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| dns::cluster_suffix_from_resolv_conf(dns::RESOLV_CONF))
                .unwrap_or_default(),
        }
    }

    pub fn with_key_size(mut self, key_size: usize) -> Self {
        self.key_size = key_size;
        self
    }

    pub fn with_cluster_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.cluster_suffix = suffix.into();
        self
    }
}

/// A key size the signer can load, `None` otherwise.
fn parse_key_size(value: &str) -> Option<usize> {
    let bits = value.trim().parse().ok()?;
    if ca::is_supported_key_size(bits) {
        Some(bits)
    } else {
        tracing::warn!(bits, "Ignoring unsupported PKI_KEY_SIZE, using {DEFAULT_KEY_SIZE}");
        None
    }
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            key_size: DEFAULT_KEY_SIZE,
            cluster_suffix: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = PkiConfig::default()
            .with_key_size(2048)
            .with_cluster_suffix("cluster.local");
        assert_eq!(config.key_size, 2048);
        assert_eq!(config.cluster_suffix, "cluster.local");
        assert_eq!(PkiConfig::default().key_size, 4096);
    }

    #[test]
    fn test_parse_key_size() {
        assert_eq!(parse_key_size("2048"), Some(2048));
        assert_eq!(parse_key_size(" 3072 "), Some(3072));
        assert_eq!(parse_key_size("1024"), None);
        assert_eq!(parse_key_size("16384"), None);
        assert_eq!(parse_key_size("2049"), None);
        assert_eq!(parse_key_size("big"), None);
    }
}
