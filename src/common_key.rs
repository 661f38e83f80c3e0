//! Common key persistence and rotation.
//!
//! The common key is the per-user symmetric key that wraps every record's
//! data key. It rotates by id: a rotation stores a new key under a new id
//! and moves the "current" pointer. Keys are never mutated in place, so
//! records written under an old id stay readable.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::CryptoService;
use crate::error::{RecordVaultError, Result};
use crate::exchange::KeyType;
use crate::key_factory;
use crate::keys::{Algorithm, Key, KeyOptions};
use crate::storage::{names, CryptoStore};

/// Common key id used before any rotation has happened.
pub const DEFAULT_COMMON_KEY_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Stores and resolves common keys by id.
pub struct CommonKeyService {
    store: Arc<CryptoStore>,
}

impl CommonKeyService {
    pub fn new(store: Arc<CryptoStore>) -> Self {
        Self { store }
    }

    /// The id new records are written under.
    ///
    /// A brand-new user has no pointer yet; absence (or an unreadable
    /// pointer) yields [`DEFAULT_COMMON_KEY_ID`].
    pub fn fetch_current_common_key_id(&self) -> String {
        match self.store.fetch_string(names::CURRENT_COMMON_KEY_ID) {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => DEFAULT_COMMON_KEY_ID.to_string(),
            Err(e) => {
                warn!(error = %e, "unreadable current common key id, using default");
                DEFAULT_COMMON_KEY_ID.to_string()
            }
        }
    }

    pub fn fetch_current_common_key(&self) -> Result<Key> {
        let id = self.fetch_current_common_key_id();
        self.fetch_common_key(&id)
    }

    /// Read the common key stored under `id`.
    ///
    /// `KeyNotFound` when absent: the caller should then fetch the wrapped
    /// key from the key-exchange API and unwrap it with the app key pair.
    pub fn fetch_common_key(&self, id: &str) -> Result<Key> {
        let exchange = self.store.fetch_exchange_key(&common_key_name(id))?;
        if exchange.key_type() != KeyType::CommonKey {
            return Err(RecordVaultError::InvalidKeyType(exchange.key_type().to_string()));
        }
        key_factory::key_from_exchange(&exchange)
    }

    /// Store a common key under `id`. Last write wins.
    pub fn store_common_key(&self, id: &str, key: &Key) -> Result<()> {
        let exchange = key_factory::exchange_from_key(KeyType::CommonKey, key)?;
        self.store.store_exchange_key(&common_key_name(id), &exchange)?;
        debug!(common_key_id = %id, "stored common key");
        Ok(())
    }

    pub fn store_current_common_key_id(&self, id: &str) -> Result<()> {
        self.store.store_string(names::CURRENT_COMMON_KEY_ID, id)
    }

    /// Evict a cached common key. The next decrypt under `id` refetches it.
    pub fn delete_common_key(&self, id: &str) -> Result<()> {
        self.store.delete(&common_key_name(id))
    }

    /// Whether `id` is cached. A store failure counts as absent.
    pub fn has_common_key(&self, id: &str) -> bool {
        match self.store.contains(&common_key_name(id)) {
            Ok(present) => present,
            Err(e) => {
                warn!(common_key_id = %id, error = %e, "secure store lookup failed, treating common key as absent");
                false
            }
        }
    }

    /// Generate a new common key under a fresh UUIDv4 id and make it current.
    ///
    /// Returns the new id and key so the caller can upload the wrapped key.
    pub fn rotate_common_key(&self, crypto: &CryptoService, key_size: usize) -> Result<(String, Key)> {
        let id = Uuid::new_v4().to_string();
        let key = crypto.generate_sym_key(Algorithm::data_key(), KeyOptions::new(key_size))?;
        self.store_common_key(&id, &key)?;
        self.store_current_common_key_id(&id)?;
        info!(common_key_id = %id, "rotated common key");
        Ok((id, key))
    }
}

fn common_key_name(id: &str) -> String {
    format!("{}{}", names::COMMON_KEY_PREFIX, id)
}
