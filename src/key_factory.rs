//! Conversion between exchange keys and usable key objects.
//!
//! Pure functions. No I/O, no randomness.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{RecordVaultError, Result};
use crate::exchange::{ExchangeKey, KeyType};
use crate::keys::{Algorithm, AsymmetricKeyPair, Key};
use crate::secret::SecretBytes;

/// The algorithm a symmetric key of this type must be used with.
///
/// Tag keys use AES-CBC/PKCS#7; every other type uses AES-GCM.
pub fn algorithm_for(key_type: KeyType) -> Algorithm {
    match key_type {
        KeyType::TagKey => Algorithm::tag_key(),
        _ => Algorithm::data_key(),
    }
}

/// Turn a symmetric exchange key into a usable [`Key`].
pub fn key_from_exchange(exchange: &ExchangeKey) -> Result<Key> {
    let encoded = exchange.symmetric_key_b64().ok_or_else(|| {
        RecordVaultError::KeyMaterialInvalid(format!(
            "exchange key of type {} has no symmetric key",
            exchange.key_type()
        ))
    })?;
    let bytes = decode_b64(encoded.expose())?;
    Key::new(bytes, algorithm_for(exchange.key_type()), exchange.version())
}

/// Turn an `APP_PRIVATE_KEY` exchange key into an [`AsymmetricKeyPair`].
///
/// Both halves are decoded eagerly. The public half must belong to the
/// private half.
pub fn key_pair_from_exchange(exchange: &ExchangeKey) -> Result<AsymmetricKeyPair> {
    let (private_b64, public_b64) = match (exchange.private_key_b64(), exchange.public_key_b64()) {
        (Some(private), Some(public)) => (private, public),
        _ => {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "exchange key of type {} is not a key pair",
                exchange.key_type()
            )))
        }
    };

    let private_der = decode_b64(private_b64.expose())?;
    let private_key = RsaPrivateKey::from_pkcs8_der(private_der.expose())
        .map_err(|e| RecordVaultError::KeyMaterialInvalid(format!("PKCS#8: {}", e)))?;

    let public_der = decode_b64(public_b64.as_bytes())?;
    let public_key = RsaPublicKey::from_public_key_der(public_der.expose())
        .map_err(|e| RecordVaultError::KeyMaterialInvalid(format!("X.509: {}", e)))?;

    if public_key.n() != private_key.n() || public_key.e() != private_key.e() {
        return Err(RecordVaultError::KeyMaterialInvalid(
            "public key does not match private key".into(),
        ));
    }

    Ok(AsymmetricKeyPair::from_parts(
        private_key,
        public_key,
        private_b64.clone(),
        public_b64.to_string(),
        exchange.version(),
    ))
}

/// Turn a [`Key`] back into its exchange form under the given type.
pub fn exchange_from_key(key_type: KeyType, key: &Key) -> Result<ExchangeKey> {
    if !key_type.is_symmetric() {
        return Err(RecordVaultError::InvalidKeyType(key_type.to_string()));
    }
    if algorithm_for(key_type) != key.algorithm() {
        return Err(RecordVaultError::InvalidKeyType(format!(
            "{} cannot carry a {} key",
            key_type,
            key.algorithm().transformation()
        )));
    }
    ExchangeKey::symmetric(key_type, key.to_base64(), key.version())
}

/// Turn an [`AsymmetricKeyPair`] back into its `APP_PRIVATE_KEY` exchange form.
pub fn exchange_from_key_pair(pair: &AsymmetricKeyPair) -> Result<ExchangeKey> {
    ExchangeKey::key_pair(
        pair.private_key_base64().clone(),
        pair.public_key_base64().to_string(),
        pair.version(),
    )
}

fn decode_b64(encoded: &[u8]) -> Result<SecretBytes> {
    STANDARD
        .decode(encoded)
        .map(SecretBytes::new)
        .map_err(|e| RecordVaultError::KeyMaterialInvalid(format!("base64: {}", e)))
}
