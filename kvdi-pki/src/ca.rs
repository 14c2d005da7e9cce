use crate::codec::{self, BundleMap, DecodedBundle};
use crate::error::{PkiError, Result};
use crate::profile::{self, CaProfile, CertProfile};
use rand::thread_rng;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};

/// The default RSA modulus size for every key in the PKI.
pub const DEFAULT_KEY_SIZE: usize = 4096;
/// Smallest modulus the signer accepts.
pub const MIN_KEY_SIZE: usize = 2048;
/// Largest modulus the signer accepts.
pub const MAX_KEY_SIZE: usize = 8192;

/// A leaf certificate freshly signed by the CA, with its private key.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_der: Vec<u8>,
    pub key: RsaPrivateKey,
}

/// The live root CA of a cluster.
///
/// Holds the parsed-back issuer identity needed for signing, the raw
/// certificate and the RSA private key.
pub struct CertificateAuthority {
    params: CertificateParams,
    key_pair: KeyPair,
    key: RsaPrivateKey,
    cert_der: Vec<u8>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_der_len", &self.cert_der.len())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Generate a new key and a self-signed root certificate.
    pub fn new_root(profile: &CaProfile, key_size: usize) -> Result<Self> {
        let params = profile::create_ca_params(profile)?;
        let key = generate_private_key(key_size)?;
        let key_pair = to_key_pair(&key)?;

        let cert = params.self_signed(&key_pair)?;

        Ok(Self {
            params,
            key_pair,
            key,
            cert_der: cert.der().to_vec(),
        })
    }

    /// Rebuild a CA from a decoded bundle.
    ///
    /// The signing identity is reconstructed from the stored certificate so
    /// issued leaves name the stored subject as their issuer. The private key
    /// is trusted as-is and not matched against the certificate.
    pub fn from_bundle(bundle: DecodedBundle) -> Result<Self> {
        let (_, x509) = x509_parser::parse_x509_certificate(&bundle.ca_der).map_err(|e| {
            PkiError::InvalidCertificate {
                key: codec::CA_CERT_KEY,
                reason: e.to_string(),
            }
        })?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        for rdn in x509.subject().iter_rdn() {
            for attr in rdn.iter() {
                let oid = attr.attr_type();
                let val = attr.as_str().unwrap_or_default().to_string();

                if oid == &x509_parser::oid_registry::OID_X509_COMMON_NAME {
                    dn.push(DnType::CommonName, val);
                } else if oid == &x509_parser::oid_registry::OID_X509_ORGANIZATION_NAME {
                    dn.push(DnType::OrganizationName, val);
                } else if oid == &x509_parser::oid_registry::OID_X509_ORGANIZATIONAL_UNIT {
                    dn.push(DnType::OrganizationalUnitName, val);
                } else if oid == &x509_parser::oid_registry::OID_X509_COUNTRY_NAME {
                    dn.push(DnType::CountryName, val);
                }
            }
        }
        params.distinguished_name = dn;

        params.is_ca = if x509.is_ca() {
            IsCa::Ca(BasicConstraints::Unconstrained)
        } else {
            IsCa::NoCa
        };

        let key_pair = to_key_pair(&bundle.key)?;

        Ok(Self {
            params,
            key_pair,
            key: bundle.key,
            cert_der: bundle.ca_der,
        })
    }

    /// Generate a key and sign a leaf certificate for the given profile.
    pub fn issue(&self, profile: &CertProfile, key_size: usize) -> Result<IssuedCertificate> {
        let params = profile::create_cert_params(profile)?;
        let key = generate_private_key(key_size)?;
        let key_pair = to_key_pair(&key)?;

        let issuer = Issuer::new(self.params.clone(), &self.key_pair);
        let cert = params.signed_by(&key_pair, &issuer)?;

        Ok(IssuedCertificate {
            cert_der: cert.der().to_vec(),
            key,
        })
    }

    /// Encode an issued leaf into a bundle alongside this CA.
    pub fn bundle_for(&self, issued: &IssuedCertificate) -> Result<BundleMap> {
        codec::encode_bundle(&self.cert_der, &issued.cert_der, &issued.key)
    }

    /// Encode the CA itself; the CA certificate fills both certificate slots.
    pub fn to_bundle(&self) -> Result<BundleMap> {
        codec::encode_bundle(&self.cert_der, &self.cert_der, &self.key)
    }

    /// Raw DER of the CA certificate.
    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }
}

/// Whether keys of this modulus size can be loaded for signing.
pub fn is_supported_key_size(bits: usize) -> bool {
    (MIN_KEY_SIZE..=MAX_KEY_SIZE).contains(&bits) && bits % 8 == 0
}

/// Generate an RSA private key of the given modulus size.
pub fn generate_private_key(bits: usize) -> Result<RsaPrivateKey> {
    if !is_supported_key_size(bits) {
        return Err(PkiError::UnsupportedKeySize(bits));
    }
    let mut rng = thread_rng();
    Ok(RsaPrivateKey::new(&mut rng, bits)?)
}

fn to_key_pair(key: &RsaPrivateKey) -> Result<KeyPair> {
    let pem = key.to_pkcs8_pem(LineEnding::LF)?;
    Ok(KeyPair::from_pem(&pem)?)
}
