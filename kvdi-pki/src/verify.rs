//! Chain verification of leaf certificates against a single CA.
//!
//! Verification runs through the same rustls/webpki verifiers the app and
//! the session proxies use when they handshake, so a bundle that passes here
//! is one the peers will accept.

use crate::error::{PkiError, Result};
use crate::metadata::CertMetadata;
use rustls::RootCertStore;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::ServerCertVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use std::sync::Arc;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// A pool holding only the given CA.
fn root_store(ca_der: &[u8]) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    root_store
        .add(CertificateDer::from(ca_der.to_vec()))
        .map_err(|e| PkiError::VerificationFailed(e.to_string()))?;
    Ok(root_store)
}

/// Verify a server certificate against a CA root for the given DNS name.
pub fn verify_server_cert(cert_der: &[u8], ca_der: &[u8], dns_name: &str) -> Result<()> {
    let root_store = root_store(ca_der)?;
    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider())
        .build()
        .map_err(|e| PkiError::VerificationFailed(e.to_string()))?;

    let server_name = ServerName::try_from(dns_name)
        .map_err(|_| PkiError::VerificationFailed(format!("invalid DNS name {dns_name}")))?;

    verifier
        .verify_server_cert(
            &CertificateDer::from(cert_der),
            &[],
            &server_name,
            &[],
            UnixTime::now(),
        )
        .map_err(|e| PkiError::VerificationFailed(e.to_string()))?;

    Ok(())
}

/// Verify a client certificate against a CA root.
///
/// Client verification in TLS carries no name, so the expected DNS name is
/// checked against the certificate's SANs separately.
pub fn verify_client_cert(cert_der: &[u8], ca_der: &[u8], dns_name: &str) -> Result<()> {
    let root_store = root_store(ca_der)?;
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider())
        .build()
        .map_err(|e| PkiError::VerificationFailed(e.to_string()))?;

    verifier
        .verify_client_cert(&CertificateDer::from(cert_der), &[], UnixTime::now())
        .map_err(|e| PkiError::VerificationFailed(e.to_string()))?;

    let metadata = CertMetadata::from_der(cert_der)?;
    if !metadata.dns_names.iter().any(|name| name == dns_name) {
        return Err(PkiError::VerificationFailed(format!(
            "certificate is not valid for name {dns_name}"
        )));
    }

    Ok(())
}
