use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkiError {
    #[error("RCGen error: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("PKCS#1 error: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),
    #[error("PKCS#8 error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Bundle decoding ──
    #[error("bundle is missing key {0}")]
    MissingKey(&'static str),
    #[error("could not PEM decode {key}: {reason}")]
    PemDecode { key: &'static str, reason: String },
    #[error("unexpected PEM block in {key}: expected {expected}, found {found}")]
    UnexpectedPemBlock {
        key: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("could not parse certificate in {key}: {reason}")]
    InvalidCertificate { key: &'static str, reason: String },
    #[error("could not parse private key in {key}: {reason}")]
    InvalidKey { key: &'static str, reason: String },

    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("Unsupported RSA key size: {0} bits")]
    UnsupportedKeySize(usize),
    #[error("Invalid service IP: {0}")]
    InvalidServiceIp(String),

    // ── Store ──
    #[error("secret {0} already exists")]
    AlreadyExists(String),
    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, PkiError>;
