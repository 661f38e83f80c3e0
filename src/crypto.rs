//! Low-level cryptographic operations.
//!
//! This module is the only place in the crate that touches cipher
//! implementations. Every other module encrypts and decrypts through
//! [`CryptoService`].
//!
//! Primitive choices:
//! - **AES-GCM** (`ring`): data, attachment and common keys. 96-bit IV.
//! - **AES-CBC/PKCS#7** (`aes` + `cbc`): tag-encryption key. 128-bit IV.
//! - **RSA-OAEP-SHA256** (`rsa`): common-key unwrap during key exchange.
//! - **Randomness**: `ring::rand::SystemRandom` for keys and IVs, the OS RNG
//!   for RSA key generation and OAEP padding.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;
use tracing::{debug, error, info, trace};

use crate::error::{RecordVaultError, Result};
use crate::exchange::{ExchangeKey, KeyType, KEY_VERSION};
use crate::key_factory;
use crate::keys::{Algorithm, AsymmetricKeyPair, BlockMode, Cipher, Key, KeyOptions};
use crate::secret::SecretBytes;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Smallest RSA modulus accepted for the app key pair.
const MIN_RSA_BITS: usize = 2048;

/// Largest RSA modulus accepted for the app key pair.
const MAX_RSA_BITS: usize = 4096;

static PROVIDER_READY: OnceLock<bool> = OnceLock::new();

/// Process-wide crypto provider initialisation.
///
/// Idempotent: the first call probes the system RNG and logs the outcome,
/// later calls return the cached result. No operation requires this to have
/// run; it exists so an application can fail fast at startup.
pub fn init_crypto_provider() -> Result<()> {
    let ready = *PROVIDER_READY.get_or_init(|| {
        let mut probe = [0u8; 16];
        match SystemRandom::new().fill(&mut probe) {
            Ok(()) => {
                info!("crypto provider initialised");
                true
            }
            Err(_) => {
                error!("crypto provider failed: system RNG unavailable");
                false
            }
        }
    });
    if ready {
        Ok(())
    } else {
        Err(RecordVaultError::RandomnessFailure)
    }
}

/// Symmetric and asymmetric primitives plus key generation.
///
/// Stateless apart from the RNG handle; cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct CryptoService {
    rng: SystemRandom,
}

impl Default for CryptoService {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoService {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Symmetric
    // -----------------------------------------------------------------------

    /// Encrypt with the mode fixed by the key's algorithm.
    ///
    /// The IV length must match the algorithm. GCM output carries the
    /// 16-byte authentication tag appended.
    pub fn sym_encrypt(&self, key: &Key, plaintext: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_iv(key, iv, RecordVaultError::EncryptionFailed)?;
        match key.algorithm().mode {
            BlockMode::Gcm => {
                let sealing = gcm_key(key)?;
                let nonce = Nonce::try_assume_unique_for_key(iv)
                    .map_err(|_| RecordVaultError::EncryptionFailed)?;
                let mut in_out = plaintext.to_vec();
                sealing
                    .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
                    .map_err(|_| RecordVaultError::EncryptionFailed)?;
                Ok(in_out)
            }
            BlockMode::Cbc => {
                let bytes = key.as_bytes();
                match bytes.len() {
                    16 => Ok(Aes128CbcEnc::new_from_slices(bytes, iv)
                        .map_err(|_| RecordVaultError::EncryptionFailed)?
                        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
                    32 => Ok(Aes256CbcEnc::new_from_slices(bytes, iv)
                        .map_err(|_| RecordVaultError::EncryptionFailed)?
                        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
                    _ => Err(RecordVaultError::EncryptionFailed),
                }
            }
            BlockMode::None => Err(RecordVaultError::EncryptionFailed),
        }
    }

    /// Decrypt with the mode fixed by the key's algorithm.
    ///
    /// A wrong key, wrong IV or tampered ciphertext fails; no partial
    /// plaintext is returned.
    pub fn sym_decrypt(&self, key: &Key, ciphertext: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_iv(key, iv, RecordVaultError::DecryptionFailed)?;
        match key.algorithm().mode {
            BlockMode::Gcm => {
                let opening = gcm_key(key)?;
                let nonce = Nonce::try_assume_unique_for_key(iv)
                    .map_err(|_| RecordVaultError::DecryptionFailed)?;
                let mut in_out = ciphertext.to_vec();
                let plaintext = opening
                    .open_in_place(nonce, Aad::empty(), &mut in_out)
                    .map_err(|_| RecordVaultError::DecryptionFailed)?;
                Ok(plaintext.to_vec())
            }
            BlockMode::Cbc => {
                let bytes = key.as_bytes();
                match bytes.len() {
                    16 => Aes128CbcDec::new_from_slices(bytes, iv)
                        .map_err(|_| RecordVaultError::DecryptionFailed)?
                        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                        .map_err(|_| RecordVaultError::DecryptionFailed),
                    32 => Aes256CbcDec::new_from_slices(bytes, iv)
                        .map_err(|_| RecordVaultError::DecryptionFailed)?
                        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                        .map_err(|_| RecordVaultError::DecryptionFailed),
                    _ => Err(RecordVaultError::DecryptionFailed),
                }
            }
            BlockMode::None => Err(RecordVaultError::DecryptionFailed),
        }
    }

    /// Encrypt under a fresh random IV and prepend it.
    ///
    /// # Layout of returned bytes
    /// ```text
    /// [ iv (12 bytes for GCM) ][ ciphertext + tag ]
    /// ```
    pub fn encrypt_bytes(&self, key: &Key, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = self.random_bytes(key.algorithm().iv_len())?;
        let ciphertext = self.sym_encrypt(key, plaintext, &iv)?;

        let mut output = Vec::with_capacity(iv.len() + ciphertext.len());
        output.extend_from_slice(&iv);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Inverse of [`CryptoService::encrypt_bytes`].
    pub fn decrypt_bytes(&self, key: &Key, data: &[u8]) -> Result<Vec<u8>> {
        let iv_len = key.algorithm().iv_len();
        if data.len() < iv_len {
            return Err(RecordVaultError::DecryptionFailed);
        }
        let (iv, ciphertext) = data.split_at(iv_len);
        self.sym_decrypt(key, ciphertext, iv)
    }

    // -----------------------------------------------------------------------
    // Asymmetric
    // -----------------------------------------------------------------------

    /// RSA-OAEP-SHA256 encryption to the pair's public half.
    pub fn asym_encrypt(&self, key_pair: &AsymmetricKeyPair, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::rngs::OsRng;
        key_pair
            .public_key()
            .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|_| RecordVaultError::EncryptionFailed)
    }

    /// RSA-OAEP-SHA256 decryption with the pair's private half.
    pub fn asym_decrypt(&self, key_pair: &AsymmetricKeyPair, ciphertext: &[u8]) -> Result<SecretBytes> {
        key_pair
            .private_key()
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(SecretBytes::new)
            .map_err(|_| RecordVaultError::DecryptionFailed)
    }

    // -----------------------------------------------------------------------
    // Key generation
    // -----------------------------------------------------------------------

    /// Generate an AES key for the given algorithm. Size must be 128 or 256 bits.
    pub fn generate_sym_key(&self, algorithm: Algorithm, options: KeyOptions) -> Result<Key> {
        if algorithm.cipher != Cipher::Aes {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "{} is not a symmetric algorithm",
                algorithm.transformation()
            )));
        }
        if !matches!(options.key_size, 128 | 256) {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "unsupported AES key size: {}",
                options.key_size
            )));
        }
        let bytes = self.random_bytes(options.key_size / 8)?;
        trace!(algorithm = %algorithm.transformation(), bits = options.key_size, "generated symmetric key");
        Key::new(SecretBytes::new(bytes), algorithm, KEY_VERSION)
    }

    /// Generate an RSA key pair. Size must be between 2048 and 4096 bits.
    pub fn generate_asym_key_pair(
        &self,
        algorithm: Algorithm,
        options: KeyOptions,
    ) -> Result<AsymmetricKeyPair> {
        if algorithm.cipher != Cipher::Rsa {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "{} is not an asymmetric algorithm",
                algorithm.transformation()
            )));
        }
        if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&options.key_size) {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "unsupported RSA key size: {}",
                options.key_size
            )));
        }
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, options.key_size)
            .map_err(|e| RecordVaultError::KeyMaterialInvalid(e.to_string()))?;
        debug!(bits = options.key_size, "generated app key pair");
        AsymmetricKeyPair::new(private_key, KEY_VERSION)
    }

    // -----------------------------------------------------------------------
    // Key wrapping
    // -----------------------------------------------------------------------

    /// Wrap a key under a common key: exchange JSON, GCM-encrypted, base64.
    pub fn wrap_key(&self, common_key: &Key, key_type: KeyType, key: &Key) -> Result<String> {
        let exchange = key_factory::exchange_from_key(key_type, key)?;
        let json = exchange.to_json()?;
        let encrypted = self.encrypt_bytes(common_key, json.expose())?;
        Ok(STANDARD.encode(encrypted))
    }

    /// Unwrap a key produced by [`CryptoService::wrap_key`], checking its type.
    pub fn unwrap_key(&self, common_key: &Key, expected: KeyType, wrapped: &str) -> Result<Key> {
        let encrypted = STANDARD
            .decode(wrapped)
            .map_err(|_| RecordVaultError::DecryptionFailed)?;
        let json = SecretBytes::new(self.decrypt_bytes(common_key, &encrypted)?);
        let exchange = ExchangeKey::from_json(json.expose())?;
        expect_type(&exchange, expected)?;
        key_factory::key_from_exchange(&exchange)
    }

    /// Wrap a common key to an app public key for upload after rotation.
    pub fn wrap_common_key(&self, key_pair: &AsymmetricKeyPair, common_key: &Key) -> Result<Vec<u8>> {
        let exchange = key_factory::exchange_from_key(KeyType::CommonKey, common_key)?;
        self.asym_encrypt(key_pair, exchange.to_json()?.expose())
    }

    /// Unwrap a common key delivered by the key-exchange API.
    pub fn unwrap_common_key(&self, key_pair: &AsymmetricKeyPair, wrapped: &[u8]) -> Result<Key> {
        let json = self.asym_decrypt(key_pair, wrapped)?;
        let exchange = ExchangeKey::from_json(json.expose())?;
        expect_type(&exchange, KeyType::CommonKey)?;
        key_factory::key_from_exchange(&exchange)
    }

    fn random_bytes(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.rng
            .fill(&mut buf)
            .map_err(|_| RecordVaultError::RandomnessFailure)?;
        Ok(buf)
    }
}

fn gcm_key(key: &Key) -> Result<LessSafeKey> {
    let algorithm = match key.as_bytes().len() {
        16 => &AES_128_GCM,
        32 => &AES_256_GCM,
        n => {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "AES key must be 16 or 32 bytes, got {}",
                n
            )))
        }
    };
    let unbound = UnboundKey::new(algorithm, key.as_bytes())
        .map_err(|_| RecordVaultError::KeyMaterialInvalid("AES key rejected".into()))?;
    Ok(LessSafeKey::new(unbound))
}

fn check_iv(key: &Key, iv: &[u8], failure: RecordVaultError) -> Result<()> {
    if iv.len() == key.algorithm().iv_len() {
        Ok(())
    } else {
        Err(failure)
    }
}

fn expect_type(exchange: &ExchangeKey, expected: KeyType) -> Result<()> {
    if exchange.key_type() == expected {
        Ok(())
    } else {
        Err(RecordVaultError::InvalidKeyType(format!(
            "expected {}, got {}",
            expected,
            exchange.key_type()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_key() -> Key {
        CryptoService::new()
            .generate_sym_key(Algorithm::data_key(), KeyOptions::new(256))
            .unwrap()
    }

    #[test]
    fn test_provider_init_is_idempotent() {
        assert!(init_crypto_provider().is_ok());
        assert!(init_crypto_provider().is_ok());
    }

    #[test]
    fn test_gcm_roundtrip() {
        let service = CryptoService::new();
        let key = data_key();
        let iv = [9u8; 12];
        let ciphertext = service.sym_encrypt(&key, b"hello", &iv).unwrap();
        assert_eq!(ciphertext.len(), 5 + 16);
        assert_eq!(service.sym_decrypt(&key, &ciphertext, &iv).unwrap(), b"hello");
    }

    #[test]
    fn test_cbc_roundtrip_and_padding() {
        let service = CryptoService::new();
        let key = service
            .generate_sym_key(Algorithm::tag_key(), KeyOptions::new(256))
            .unwrap();
        let iv = [0u8; 16];
        let ciphertext = service.sym_encrypt(&key, b"resourcetype=patient", &iv).unwrap();
        assert_eq!(ciphertext.len() % 16, 0);
        assert_eq!(
            service.sym_decrypt(&key, &ciphertext, &iv).unwrap(),
            b"resourcetype=patient"
        );
    }

    #[test]
    fn test_cbc_fixed_iv_is_deterministic() {
        let service = CryptoService::new();
        let key = service
            .generate_sym_key(Algorithm::tag_key(), KeyOptions::new(256))
            .unwrap();
        let iv = [0u8; 16];
        assert_eq!(
            service.sym_encrypt(&key, b"custom=x", &iv).unwrap(),
            service.sym_encrypt(&key, b"custom=x", &iv).unwrap()
        );
    }

    #[test]
    fn test_iv_length_mismatch_fails() {
        let service = CryptoService::new();
        let key = data_key();
        assert!(matches!(
            service.sym_encrypt(&key, b"x", &[0u8; 16]),
            Err(RecordVaultError::EncryptionFailed)
        ));
    }

    #[test]
    fn test_encrypt_bytes_uses_fresh_iv() {
        let service = CryptoService::new();
        let key = data_key();
        let a = service.encrypt_bytes(&key, b"same").unwrap();
        let b = service.encrypt_bytes(&key, b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(service.decrypt_bytes(&key, &a).unwrap(), b"same");
    }

    #[test]
    fn test_wrong_key_fails() {
        let service = CryptoService::new();
        let sealed = service.encrypt_bytes(&data_key(), b"secret").unwrap();
        assert!(matches!(
            service.decrypt_bytes(&data_key(), &sealed),
            Err(RecordVaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_input_fails() {
        let service = CryptoService::new();
        assert!(service.decrypt_bytes(&data_key(), &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_key_size_is_validated() {
        let service = CryptoService::new();
        assert!(service
            .generate_sym_key(Algorithm::data_key(), KeyOptions::new(192))
            .is_err());
        assert!(service
            .generate_asym_key_pair(Algorithm::asymmetric(), KeyOptions::new(1024))
            .is_err());
        assert!(service
            .generate_sym_key(Algorithm::asymmetric(), KeyOptions::new(256))
            .is_err());
    }

    #[test]
    fn test_wrap_unwrap_key() {
        let service = CryptoService::new();
        let common = data_key();
        let data = data_key();
        let wrapped = service.wrap_key(&common, KeyType::DataKey, &data).unwrap();
        assert_eq!(service.unwrap_key(&common, KeyType::DataKey, &wrapped).unwrap(), data);
        assert!(matches!(
            service.unwrap_key(&common, KeyType::AttachmentKey, &wrapped),
            Err(RecordVaultError::InvalidKeyType(_))
        ));
    }
}
