use crate::error::{PkiError, Result};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use x509_parser::extensions::GeneralName;

/// Read-only view of the fields of an X.509 certificate the PKI cares about.
#[derive(Debug, Clone)]
pub struct CertMetadata {
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub is_ca: bool,
    pub server_auth: bool,
    pub client_auth: bool,
    pub serial_number: String,
    pub fingerprint_sha256: String,
    pub not_before: time::OffsetDateTime,
    pub not_after: time::OffsetDateTime,
}

impl CertMetadata {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let fingerprint_sha256 = sha256_fingerprint(der);

        let (_, x509) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| PkiError::VerificationFailed(format!("X509 parse error: {}", e)))?;

        let mut common_name = None;
        for rdn in x509.subject().iter_rdn() {
            for attr in rdn.iter() {
                if attr.attr_type() == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                    common_name = attr.as_str().ok().map(|s| s.to_string());
                }
            }
        }

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(san)) = x509.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        let (server_auth, client_auth) = match x509.extended_key_usage() {
            Ok(Some(eku)) => (eku.value.server_auth, eku.value.client_auth),
            _ => (false, false),
        };

        Ok(Self {
            common_name,
            dns_names,
            ip_addresses,
            is_ca: x509.is_ca(),
            server_auth,
            client_auth,
            serial_number: x509.tbs_certificate.serial.to_str_radix(16),
            fingerprint_sha256,
            not_before: x509.validity().not_before.to_datetime(),
            not_after: x509.validity().not_after.to_datetime(),
        })
    }
}

/// Lowercase hex SHA-256 of a DER certificate.
pub fn sha256_fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_from_bytes() {
        assert_eq!(
            ip_from_bytes(&[10, 0, 0, 5]),
            Some("10.0.0.5".parse().unwrap())
        );
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn test_fingerprint_matches_der() {
        let der = b"not a certificate";
        let fingerprint = sha256_fingerprint(der);
        assert_eq!(fingerprint.len(), 64);
        assert_eq!(fingerprint, sha256_fingerprint(der));
        assert_ne!(fingerprint, sha256_fingerprint(b"other"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(CertMetadata::from_der(b"definitely not DER").is_err());
    }
}
