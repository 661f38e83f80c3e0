//! Error types for recordvault.
//!
//! Every variant is a distinct failure mode of the record crypto core.
//! Messages signal *what* failed without revealing key bytes, plaintext
//! tags or resource content.

use thiserror::Error;

/// Result type for all recordvault operations.
pub type Result<T> = std::result::Result<T, RecordVaultError>;

/// The single error type for all recordvault operations.
#[derive(Debug, Error)]
pub enum RecordVaultError {
    /// Key bytes could not be decoded (bad base64, PKCS#8, X.509, length or
    /// field population for the key type).
    #[error("invalid key material: {0}")]
    KeyMaterialInvalid(String),

    /// No key is stored under the given alias.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// An encryption primitive failed.
    #[error("encryption failed")]
    EncryptionFailed,

    /// A decryption primitive failed: wrong key, tampered ciphertext, bad
    /// padding or GCM authentication tag mismatch.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The record was written with a model version outside the supported window.
    #[error("model version not supported: {0}")]
    ModelVersionNotSupported(u32),

    /// A tag or annotation was blank after normalisation.
    #[error("tag or annotation must not be blank")]
    AnnotationViolation,

    /// A tag or annotation contains characters the tag format cannot carry.
    #[error("malformed tag or annotation: {0}")]
    AnnotationFormatViolation(String),

    /// An exchange key carries a version this implementation does not accept.
    #[error("invalid key version: {0}")]
    InvalidKeyVersion(u32),

    /// An exchange key carries an unknown type discriminant, or a key of the
    /// wrong type was supplied.
    #[error("invalid key type: {0}")]
    InvalidKeyType(String),

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// The record is structurally broken (e.g. no resource type tag).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The secure key-value store reported a failure.
    #[error("secure store error: {0}")]
    Store(String),

    /// The network key-exchange collaborator reported a failure.
    #[error("remote key exchange failed: {0}")]
    Remote(String),

    /// The resource parser could not (de)serialise a resource.
    #[error("resource parse error: {0}")]
    ResourceParse(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordVaultError {
    /// True when the failure means "absent", i.e. a fallback fetch may help.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }
}
