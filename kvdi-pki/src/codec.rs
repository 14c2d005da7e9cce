//! PEM encoding of certificate bundles.
//!
//! A bundle is the three-entry map persisted for every certificate role:
//! the signing CA, the leaf certificate and the leaf's RSA private key.
//! Consumers outside this crate (proxy sidecars, the app server) read the
//! same three keys, so the block types here are a wire format.

use crate::error::{PkiError, Result};
use pem::{EncodeConfig, LineEnding, Pem};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use std::collections::BTreeMap;

/// Key holding the PEM encoded CA certificate.
pub const CA_CERT_KEY: &str = "ca.crt";
/// Key holding the PEM encoded leaf certificate.
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Key holding the PEM encoded PKCS#1 private key.
pub const TLS_KEY_KEY: &str = "tls.key";

/// Every bundle key, in the order they are checked.
pub const BUNDLE_KEYS: [&str; 3] = [TLS_KEY_KEY, TLS_CERT_KEY, CA_CERT_KEY];

pub const CERTIFICATE_TAG: &str = "CERTIFICATE";
pub const RSA_PRIVATE_KEY_TAG: &str = "RSA PRIVATE KEY";

pub type BundleMap = BTreeMap<String, Vec<u8>>;

/// The raw material held by a well-formed bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBundle {
    pub ca_der: Vec<u8>,
    pub cert_der: Vec<u8>,
    pub key: RsaPrivateKey,
}

/// Encode the CA certificate, leaf certificate and leaf key into a bundle.
///
/// `ca_der` and `cert_der` are the raw ASN.1 of the certificates. For the CA
/// bundle itself both are the CA certificate.
pub fn encode_bundle(ca_der: &[u8], cert_der: &[u8], key: &RsaPrivateKey) -> Result<BundleMap> {
    let key_der = key.to_pkcs1_der()?;

    let mut bundle = BundleMap::new();
    bundle.insert(
        CA_CERT_KEY.to_string(),
        encode_block(CERTIFICATE_TAG, ca_der.to_vec()),
    );
    bundle.insert(
        TLS_CERT_KEY.to_string(),
        encode_block(CERTIFICATE_TAG, cert_der.to_vec()),
    );
    bundle.insert(
        TLS_KEY_KEY.to_string(),
        encode_block(RSA_PRIVATE_KEY_TAG, key_der.as_bytes().to_vec()),
    );
    Ok(bundle)
}

/// Decode and parse all three entries of a bundle.
///
/// Fails on the first missing key, undecodable PEM, wrong block type or
/// unparseable structure. Never panics on garbage input.
pub fn decode_bundle(bundle: &BundleMap) -> Result<DecodedBundle> {
    for key in BUNDLE_KEYS {
        if !bundle.contains_key(key) {
            return Err(PkiError::MissingKey(key));
        }
    }

    let key = decode_private_key(TLS_KEY_KEY, &bundle[TLS_KEY_KEY])?;
    let cert_der = decode_certificate(TLS_CERT_KEY, &bundle[TLS_CERT_KEY])?;
    let ca_der = decode_certificate(CA_CERT_KEY, &bundle[CA_CERT_KEY])?;

    Ok(DecodedBundle {
        ca_der,
        cert_der,
        key,
    })
}

/// Decode a `CERTIFICATE` block and make sure the DER parses as X.509.
pub fn decode_certificate(key: &'static str, data: &[u8]) -> Result<Vec<u8>> {
    let der = decode_block(key, data, CERTIFICATE_TAG)?;
    x509_parser::parse_x509_certificate(&der).map_err(|e| PkiError::InvalidCertificate {
        key,
        reason: e.to_string(),
    })?;
    Ok(der)
}

/// Decode an `RSA PRIVATE KEY` block into a PKCS#1 private key.
pub fn decode_private_key(key: &'static str, data: &[u8]) -> Result<RsaPrivateKey> {
    let der = decode_block(key, data, RSA_PRIVATE_KEY_TAG)?;
    RsaPrivateKey::from_pkcs1_der(&der).map_err(|e| PkiError::InvalidKey {
        key,
        reason: e.to_string(),
    })
}

fn encode_block(tag: &str, contents: Vec<u8>) -> Vec<u8> {
    let config = EncodeConfig::new().set_line_ending(LineEnding::LF);
    pem::encode_config(&Pem::new(tag, contents), config).into_bytes()
}

fn decode_block(key: &'static str, data: &[u8], tag: &'static str) -> Result<Vec<u8>> {
    let block = pem::parse(data).map_err(|e| PkiError::PemDecode {
        key,
        reason: e.to_string(),
    })?;

    if block.tag() != tag {
        return Err(PkiError::UnexpectedPemBlock {
            key,
            expected: tag,
            found: block.tag().to_string(),
        });
    }

    Ok(block.into_contents())
}
