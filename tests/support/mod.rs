//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use recordvault::key_factory;
use recordvault::{
    AsymmetricKeyPair, CommonKeyApi, CryptoConfig, CryptoService, ExchangeKey,
    InMemorySecureStore, JsonResourceParser, Key, RecordEncryptionService, RecordVaultError,
    Result, SecretBytes,
};

pub const USER_ID: &str = "user-42";

/// RSA key generation is slow; every test in a binary shares one pair.
pub fn app_key_pair() -> AsymmetricKeyPair {
    static PAIR_JSON: OnceLock<SecretBytes> = OnceLock::new();
    let json = PAIR_JSON.get_or_init(|| {
        let pair = CryptoService::new()
            .generate_asym_key_pair(recordvault::Algorithm::asymmetric(), recordvault::KeyOptions::new(2048))
            .unwrap();
        key_factory::exchange_from_key_pair(&pair).unwrap().to_json().unwrap()
    });
    let exchange = ExchangeKey::from_json(json.expose()).unwrap();
    key_factory::key_pair_from_exchange(&exchange).unwrap()
}

/// Key-exchange API double: serves wrapped common keys and counts calls.
#[derive(Default)]
pub struct FakeKeyApi {
    wrapped: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl FakeKeyApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a common key for `id`, wrapped to the shared app key pair.
    pub fn publish(&self, id: &str, key: &Key) {
        let wrapped = CryptoService::new()
            .wrap_common_key(&app_key_pair(), key)
            .unwrap();
        self.wrapped.lock().unwrap().insert(id.to_string(), wrapped);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CommonKeyApi for FakeKeyApi {
    fn fetch_common_key(&self, _alias: &str, user_id: &str, common_key_id: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if user_id != USER_ID {
            return Err(RecordVaultError::Remote("unknown user".into()));
        }
        self.wrapped
            .lock()
            .unwrap()
            .get(common_key_id)
            .cloned()
            .ok_or_else(|| RecordVaultError::Remote(format!("no common key {}", common_key_id)))
    }
}

/// One device: its own secure store, sharing the key API with other devices.
pub struct Device {
    pub store: Arc<InMemorySecureStore>,
    pub service: RecordEncryptionService,
}

impl Device {
    pub fn new(api: Arc<FakeKeyApi>) -> Self {
        let store = Arc::new(InMemorySecureStore::new());
        let config = CryptoConfig {
            alias: "alice".into(),
            client_id: "acme#rust".into(),
            ..CryptoConfig::default()
        };
        let service = RecordEncryptionService::new(
            config,
            store.clone(),
            api,
            Arc::new(JsonResourceParser),
        );
        service
            .crypto_store()
            .store_app_key_pair(&app_key_pair())
            .unwrap();
        Self { store, service }
    }

    /// Rotate to a fresh common key and publish it to the API.
    pub fn rotate(&self, api: &FakeKeyApi) -> String {
        let (id, key) = self.service.rotate_common_key().unwrap();
        api.publish(&id, &key);
        id
    }

    /// Share this device's tag key with another device of the same user.
    pub fn share_tag_key_with(&self, other: &Device) {
        let key = self.service.tag_crypto().tag_encryption_key().unwrap();
        other
            .service
            .crypto_store()
            .store_tag_encryption_key(&key)
            .unwrap();
    }
}
