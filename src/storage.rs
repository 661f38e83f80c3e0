//! Secure key-value storage.
//!
//! [`SecureStore`] is the platform's secret store (Keychain, Android
//! Keystore-backed preferences, ...). The core treats it as a trusted,
//! already thread-safe collaborator and never adds its own locking on top.
//!
//! [`CryptoStore`] layers alias-scoped names over it:
//!
//! ```text
//! {alias}_crypto_common_key_{common_key_id}
//! {alias}_crypto_current_common_key_id
//! {alias}_crypto_tag_encryption_key
//! {alias}_crypto_app_key_pair
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::crypto::CryptoService;
use crate::error::{RecordVaultError, Result};
use crate::exchange::{ExchangeKey, KeyType};
use crate::key_factory;
use crate::keys::{Algorithm, AsymmetricKeyPair, Key, KeyOptions};
use crate::secret::SecretBytes;

/// Platform secret store. Every write is a single atomic put.
pub trait SecureStore: Send + Sync {
    /// Read a secret. `Ok(None)` when nothing is stored under `alias`.
    fn get_secret(&self, alias: &str) -> Result<Option<SecretBytes>>;

    /// Store a secret, replacing any previous value.
    fn store_secret(&self, alias: &str, secret: &SecretBytes) -> Result<()>;

    fn contains(&self, alias: &str) -> Result<bool>;

    fn delete_secret(&self, alias: &str) -> Result<()>;

    /// Remove every secret.
    fn clear(&self) -> Result<()>;
}

/// In-process store. Suitable for tests and for platforms that persist
/// the map themselves.
#[derive(Debug, Default)]
pub struct InMemorySecureStore {
    secrets: RwLock<HashMap<String, SecretBytes>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }
}

impl SecureStore for InMemorySecureStore {
    fn get_secret(&self, alias: &str) -> Result<Option<SecretBytes>> {
        Ok(self.secrets.read().get(alias).cloned())
    }

    fn store_secret(&self, alias: &str, secret: &SecretBytes) -> Result<()> {
        self.secrets.write().insert(alias.to_string(), secret.clone());
        Ok(())
    }

    fn contains(&self, alias: &str) -> Result<bool> {
        Ok(self.secrets.read().contains_key(alias))
    }

    fn delete_secret(&self, alias: &str) -> Result<()> {
        self.secrets.write().remove(alias);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.secrets.write().clear();
        Ok(())
    }
}

/// Alias-scoped key persistence over a [`SecureStore`].
pub struct CryptoStore {
    alias: String,
    store: Arc<dyn SecureStore>,
}

impl CryptoStore {
    pub fn new(alias: impl Into<String>, store: Arc<dyn SecureStore>) -> Self {
        Self {
            alias: alias.into(),
            store,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Full store name for a crypto entry, e.g. `alice_crypto_tag_encryption_key`.
    pub fn scoped(&self, name: &str) -> String {
        format!("{}_crypto_{}", self.alias, name)
    }

    pub fn store_string(&self, name: &str, value: &str) -> Result<()> {
        self.store
            .store_secret(&self.scoped(name), &SecretBytes::from(value.to_string()))
    }

    /// Read a stored string. `Ok(None)` when absent.
    pub fn fetch_string(&self, name: &str) -> Result<Option<String>> {
        let secret = match self.store.get_secret(&self.scoped(name))? {
            Some(secret) => secret,
            None => return Ok(None),
        };
        secret
            .expose_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| RecordVaultError::Store(format!("{} is not UTF-8", self.scoped(name))))
    }

    pub fn store_exchange_key(&self, name: &str, key: &ExchangeKey) -> Result<()> {
        self.store.store_secret(&self.scoped(name), &key.to_json()?)
    }

    /// Read a stored exchange key. `KeyNotFound` when absent.
    pub fn fetch_exchange_key(&self, name: &str) -> Result<ExchangeKey> {
        let scoped = self.scoped(name);
        let json = self
            .store
            .get_secret(&scoped)?
            .ok_or(RecordVaultError::KeyNotFound(scoped))?;
        ExchangeKey::from_json(json.expose())
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        self.store.contains(&self.scoped(name))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.store.delete_secret(&self.scoped(name))
    }

    /// Wipe every stored secret (logout).
    pub fn clear(&self) -> Result<()> {
        debug!(alias = %self.alias, "clearing secure store");
        self.store.clear()
    }

    // -----------------------------------------------------------------------
    // Tag-encryption key
    // -----------------------------------------------------------------------

    pub fn store_tag_encryption_key(&self, key: &Key) -> Result<()> {
        let exchange = key_factory::exchange_from_key(KeyType::TagKey, key)?;
        self.store_exchange_key(names::TAG_ENCRYPTION_KEY, &exchange)
    }

    pub fn fetch_tag_encryption_key(&self) -> Result<Key> {
        let exchange = self.fetch_exchange_key(names::TAG_ENCRYPTION_KEY)?;
        key_factory::key_from_exchange(&exchange)
    }

    /// Return the stored tag key, generating and storing one on first use.
    pub fn fetch_or_generate_tag_encryption_key(
        &self,
        crypto: &CryptoService,
        key_size: usize,
    ) -> Result<Key> {
        match self.fetch_tag_encryption_key() {
            Ok(key) => Ok(key),
            Err(RecordVaultError::KeyNotFound(_)) => {
                let key = crypto.generate_sym_key(Algorithm::tag_key(), KeyOptions::new(key_size))?;
                self.store_tag_encryption_key(&key)?;
                debug!(alias = %self.alias, "generated tag encryption key");
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // App key pair
    // -----------------------------------------------------------------------

    pub fn store_app_key_pair(&self, pair: &AsymmetricKeyPair) -> Result<()> {
        let exchange = key_factory::exchange_from_key_pair(pair)?;
        self.store_exchange_key(names::APP_KEY_PAIR, &exchange)
    }

    pub fn fetch_app_key_pair(&self) -> Result<AsymmetricKeyPair> {
        let exchange = self.fetch_exchange_key(names::APP_KEY_PAIR)?;
        key_factory::key_pair_from_exchange(&exchange)
    }
}

/// Entry names below the `{alias}_crypto_` prefix.
pub(crate) mod names {
    pub const TAG_ENCRYPTION_KEY: &str = "tag_encryption_key";
    pub const APP_KEY_PAIR: &str = "app_key_pair";
    pub const CURRENT_COMMON_KEY_ID: &str = "current_common_key_id";
    pub const COMMON_KEY_PREFIX: &str = "common_key_";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto_store() -> (Arc<InMemorySecureStore>, CryptoStore) {
        let backing = Arc::new(InMemorySecureStore::new());
        let store = CryptoStore::new("alice", backing.clone());
        (backing, store)
    }

    #[test]
    fn test_names_are_alias_scoped() {
        let (_, store) = crypto_store();
        assert_eq!(
            store.scoped("current_common_key_id"),
            "alice_crypto_current_common_key_id"
        );
    }

    #[test]
    fn test_missing_exchange_key_is_not_found() {
        let (_, store) = crypto_store();
        let err = store.fetch_exchange_key("common_key_x").unwrap_err();
        assert!(err.is_key_not_found());
    }

    #[test]
    fn test_tag_key_generated_once() {
        let (backing, store) = crypto_store();
        let crypto = CryptoService::new();
        let first = store.fetch_or_generate_tag_encryption_key(&crypto, 256).unwrap();
        let second = store.fetch_or_generate_tag_encryption_key(&crypto, 256).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.algorithm(), Algorithm::tag_key());
        assert_eq!(backing.len(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let (backing, store) = crypto_store();
        store.store_string("current_common_key_id", "abc").unwrap();
        store.clear().unwrap();
        assert!(backing.is_empty());
        assert_eq!(store.fetch_string("current_common_key_id").unwrap(), None);
    }
}
