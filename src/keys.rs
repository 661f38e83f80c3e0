//! Key material types.
//!
//! This module owns the in-memory forms of every key the core handles:
//! - [`Key`]: an AES key plus the algorithm it must be used with and its
//!   key version. Data, attachment and common keys use AES-GCM; the
//!   tag-encryption key uses AES-CBC with PKCS#7 padding.
//! - [`AsymmetricKeyPair`]: the user's RSA key pair, used only to unwrap
//!   common keys delivered by the key-exchange API.
//!
//! Raw key bytes live in [`SecretBytes`] and are zeroised on drop. The
//! wire/storage form of all of these is [`crate::exchange::ExchangeKey`].

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{RecordVaultError, Result};
use crate::secret::SecretBytes;

/// GCM nonce length in bytes.
pub const GCM_IV_LEN: usize = 12;

/// CBC IV length in bytes (one AES block).
pub const CBC_IV_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Algorithm descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cipher {
    Aes,
    Rsa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    Gcm,
    Cbc,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Padding {
    NoPadding,
    Pkcs7,
    Oaep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashFunction {
    Sha256,
}

/// Cipher, block mode, padding and (for RSA) the OAEP hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Algorithm {
    pub cipher: Cipher,
    pub mode: BlockMode,
    pub padding: Padding,
    pub hash: Option<HashFunction>,
}

impl Algorithm {
    /// AES/GCM/NoPadding. Data, attachment and common keys.
    pub const fn data_key() -> Self {
        Self {
            cipher: Cipher::Aes,
            mode: BlockMode::Gcm,
            padding: Padding::NoPadding,
            hash: None,
        }
    }

    /// AES/CBC/PKCS7Padding. Tag-encryption key only.
    pub const fn tag_key() -> Self {
        Self {
            cipher: Cipher::Aes,
            mode: BlockMode::Cbc,
            padding: Padding::Pkcs7,
            hash: None,
        }
    }

    /// RSA/NONE/OAEPPadding with SHA-256.
    pub const fn asymmetric() -> Self {
        Self {
            cipher: Cipher::Rsa,
            mode: BlockMode::None,
            padding: Padding::Oaep,
            hash: Some(HashFunction::Sha256),
        }
    }

    /// The IV length this algorithm requires. Zero for RSA.
    pub fn iv_len(&self) -> usize {
        match self.mode {
            BlockMode::Gcm => GCM_IV_LEN,
            BlockMode::Cbc => CBC_IV_LEN,
            BlockMode::None => 0,
        }
    }

    /// JCA-style transformation string, e.g. `AES/GCM/NoPadding`.
    pub fn transformation(&self) -> String {
        let cipher = match self.cipher {
            Cipher::Aes => "AES",
            Cipher::Rsa => "RSA",
        };
        let mode = match self.mode {
            BlockMode::Gcm => "GCM",
            BlockMode::Cbc => "CBC",
            BlockMode::None => "NONE",
        };
        let padding = match self.padding {
            Padding::NoPadding => "NoPadding",
            Padding::Pkcs7 => "PKCS7Padding",
            Padding::Oaep => "OAEPPadding",
        };
        format!("{}/{}/{}", cipher, mode, padding)
    }
}

/// Options for key generation. The size is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOptions {
    /// Key size in bits.
    pub key_size: usize,
}

impl KeyOptions {
    pub fn new(key_size: usize) -> Self {
        Self { key_size }
    }
}

// ---------------------------------------------------------------------------
// Symmetric keys
// ---------------------------------------------------------------------------

/// Raw AES key bytes plus the transformation they are meant for.
///
/// Two symmetric keys are equal when their bytes are equal.
#[derive(Clone, Debug)]
pub struct SymmetricKey {
    bytes: SecretBytes,
    transformation: String,
}

impl SymmetricKey {
    pub fn new(bytes: SecretBytes, transformation: impl Into<String>) -> Self {
        Self {
            bytes,
            transformation: transformation.into(),
        }
    }

    pub fn transformation(&self) -> &str {
        &self.transformation
    }

    pub(crate) fn bytes(&self) -> &SecretBytes {
        &self.bytes
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SymmetricKey {}

/// A usable AES key: bytes, algorithm and key version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    symmetric: SymmetricKey,
    algorithm: Algorithm,
    version: u32,
}

impl Key {
    /// Build a key from raw bytes. AES accepts 128- and 256-bit keys only.
    pub fn new(bytes: SecretBytes, algorithm: Algorithm, version: u32) -> Result<Self> {
        if algorithm.cipher != Cipher::Aes {
            return Err(RecordVaultError::KeyMaterialInvalid(
                "symmetric key requires an AES algorithm".into(),
            ));
        }
        if !matches!(bytes.len(), 16 | 32) {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "AES key must be 16 or 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            symmetric: SymmetricKey::new(bytes, algorithm.transformation()),
            algorithm,
            version,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn symmetric(&self) -> &SymmetricKey {
        &self.symmetric
    }

    /// Base64 of the raw key bytes, as carried in the exchange form.
    pub(crate) fn to_base64(&self) -> SecretBytes {
        SecretBytes::from(STANDARD.encode(self.symmetric.bytes().expose()))
    }

    /// `pub(crate)`: raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.symmetric.bytes().expose()
    }
}

// ---------------------------------------------------------------------------
// Asymmetric key pair
// ---------------------------------------------------------------------------

/// The user's RSA key pair.
///
/// Both halves are decoded once, at construction, together with their
/// base64 DER encodings (PKCS#8 private, X.509 SubjectPublicKeyInfo public).
/// Nothing is materialised lazily and nothing mutates after construction.
pub struct AsymmetricKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    private_b64: SecretBytes,
    public_b64: String,
    algorithm: Algorithm,
    version: u32,
}

impl AsymmetricKeyPair {
    /// Build a pair from decoded halves, encoding both once.
    pub fn new(private_key: RsaPrivateKey, version: u32) -> Result<Self> {
        let public_key = private_key.to_public_key();
        let private_der = private_key
            .to_pkcs8_der()
            .map_err(|e| RecordVaultError::KeyMaterialInvalid(e.to_string()))?;
        let public_der = public_key
            .to_public_key_der()
            .map_err(|e| RecordVaultError::KeyMaterialInvalid(e.to_string()))?;

        Ok(Self {
            private_b64: SecretBytes::from(STANDARD.encode(private_der.as_bytes())),
            public_b64: STANDARD.encode(public_der.as_bytes()),
            private_key,
            public_key,
            algorithm: Algorithm::asymmetric(),
            version,
        })
    }

    /// Build a pair from already-decoded halves and their wire encodings.
    pub(crate) fn from_parts(
        private_key: RsaPrivateKey,
        public_key: RsaPublicKey,
        private_b64: SecretBytes,
        public_b64: String,
        version: u32,
    ) -> Self {
        Self {
            private_key,
            public_key,
            private_b64,
            public_b64,
            algorithm: Algorithm::asymmetric(),
            version,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Base64 X.509 SubjectPublicKeyInfo. Safe to publish.
    pub fn public_key_base64(&self) -> &str {
        &self.public_b64
    }

    /// Base64 PKCS#8 private key.
    pub(crate) fn private_key_base64(&self) -> &SecretBytes {
        &self.private_b64
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub(crate) fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

impl PartialEq for AsymmetricKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.private_b64 == other.private_b64 && self.public_b64 == other.public_b64
    }
}

impl fmt::Debug for AsymmetricKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsymmetricKeyPair")
            .field("algorithm", &self.algorithm.transformation())
            .field("public_key", &self.public_b64)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
