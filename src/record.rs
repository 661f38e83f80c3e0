//! Record encryption and decryption.
//!
//! A record is either in memory ([`DecryptedRecord`]) or on the wire
//! ([`EncryptedRecord`]); nothing in between is ever handed to callers.
//!
//! Encrypt:
//! 1. Encrypt tags and annotations under the tag-encryption key.
//! 2. Load the current common key and its id.
//! 3. Wrap the data key under the common key.
//! 4. Encrypt the resource under the data key (fresh IV).
//! 5. Wrap the attachments key, if any.
//! 6. Assemble the wire record.
//!
//! Decrypt reverses the steps, resolving the common key by the id stored
//! in the record. A key missing from the secure store is fetched from the
//! key-exchange API, unwrapped with the app key pair and written through to
//! the store. Concurrent decrypts of the same unseen id may each fetch; the
//! API returns the same key for an id, so the cached bytes are identical
//! whichever write lands last.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::common_key::{CommonKeyService, DEFAULT_COMMON_KEY_ID};
use crate::config::CryptoConfig;
use crate::crypto::CryptoService;
use crate::encoding;
use crate::error::{RecordVaultError, Result};
use crate::exchange::{ExchangeKey, KeyType};
use crate::keys::{Algorithm, AsymmetricKeyPair, Key, KeyOptions};
use crate::remote::CommonKeyApi;
use crate::resource::{FhirVersion, Resource, ResourceParser};
use crate::storage::{CryptoStore, SecureStore};
use crate::tags::{tag_keys, Annotations, TagCryptoService, Tags};

/// A key wrapped under a common key: base64 of `iv || GCM(exchange JSON)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedKey(String);

impl EncryptedKey {
    pub fn new(wrapped: impl Into<String>) -> Self {
        Self(wrapped.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn default_common_key_id() -> String {
    DEFAULT_COMMON_KEY_ID.to_string()
}

/// Wire form of a record. Field names match records already stored by
/// deployed clients and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    #[serde(default = "default_common_key_id")]
    pub common_key_id: String,

    #[serde(alias = "record_id", default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    pub encrypted_tags: Vec<String>,

    pub encrypted_body: String,

    #[serde(rename = "date", default, skip_serializing_if = "Option::is_none")]
    pub custom_creation_date: Option<NaiveDate>,

    #[serde(rename = "encrypted_key")]
    pub encrypted_data_key: EncryptedKey,

    #[serde(rename = "attachment_key", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_attachments_key: Option<EncryptedKey>,

    pub model_version: u32,

    /// Server-side timestamp, passed through untouched.
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<DateTime<Utc>>,
}

impl EncryptedRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// In-memory form of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedRecord {
    pub identifier: Option<String>,
    pub resource: Resource,
    pub tags: Tags,
    pub annotations: Annotations,
    pub custom_creation_date: Option<NaiveDate>,
    pub updated_date: Option<DateTime<Utc>>,
    pub data_key: Key,
    pub attachments_key: Option<Key>,
    pub model_version: u32,
}

/// Ties keys, tags and resource bytes into wire records and back.
pub struct RecordEncryptionService {
    config: CryptoConfig,
    crypto: Arc<CryptoService>,
    store: Arc<CryptoStore>,
    common_keys: CommonKeyService,
    tag_crypto: TagCryptoService,
    api: Arc<dyn CommonKeyApi>,
    parser: Arc<dyn ResourceParser>,
}

impl RecordEncryptionService {
    pub fn new(
        config: CryptoConfig,
        secure_store: Arc<dyn SecureStore>,
        api: Arc<dyn CommonKeyApi>,
        parser: Arc<dyn ResourceParser>,
    ) -> Self {
        let crypto = Arc::new(CryptoService::new());
        let store = Arc::new(CryptoStore::new(config.alias.clone(), secure_store));
        let common_keys = CommonKeyService::new(Arc::clone(&store));
        let tag_crypto = TagCryptoService::new(Arc::clone(&crypto), Arc::clone(&store), config.tag_key_size);
        Self {
            config,
            crypto,
            store,
            common_keys,
            tag_crypto,
            api,
            parser,
        }
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    pub fn crypto(&self) -> &CryptoService {
        &self.crypto
    }

    pub fn crypto_store(&self) -> &CryptoStore {
        &self.store
    }

    pub fn common_keys(&self) -> &CommonKeyService {
        &self.common_keys
    }

    pub fn tag_crypto(&self) -> &TagCryptoService {
        &self.tag_crypto
    }

    pub fn is_model_version_supported(&self, version: u32) -> bool {
        self.config.supports_model_version(version)
    }

    /// Generate and store the app key pair. Returns the public half for upload.
    pub fn provision_app_key_pair(&self) -> Result<ExchangeKey> {
        let pair: AsymmetricKeyPair = self
            .crypto
            .generate_asym_key_pair(Algorithm::asymmetric(), KeyOptions::new(self.config.app_key_size))?;
        self.store.store_app_key_pair(&pair)?;
        ExchangeKey::public_key(pair.public_key_base64().to_string(), pair.version())
    }

    /// Move to a fresh common key. Returns the id and key so the caller can
    /// wrap it with [`CryptoService::wrap_common_key`] and upload it.
    pub fn rotate_common_key(&self) -> Result<(String, Key)> {
        self.common_keys
            .rotate_common_key(&self.crypto, self.config.common_key_size)
    }

    /// Build a new in-memory record with a fresh data key.
    ///
    /// Tags and annotations are normalised and the descriptor tags (client,
    /// partner, resource type or app-data flag) are added.
    pub fn new_record(
        &self,
        resource: Resource,
        tags: Tags,
        annotations: Annotations,
        custom_creation_date: Option<NaiveDate>,
    ) -> Result<DecryptedRecord> {
        let tags = normalize_tags(tags)?;
        let annotations = annotations
            .iter()
            .map(|a| encoding::normalize(a))
            .collect::<Result<Annotations>>()?;
        let data_key = self.crypto.generate_sym_key(
            Algorithm::data_key(),
            KeyOptions::new(self.config.data_key_size),
        )?;

        Ok(DecryptedRecord {
            identifier: None,
            tags: self.with_default_tags(&resource, tags),
            resource,
            annotations,
            custom_creation_date,
            updated_date: None,
            data_key,
            attachments_key: None,
            model_version: self.config.current_model_version,
        })
    }

    pub fn generate_attachments_key(&self) -> Result<Key> {
        self.crypto.generate_sym_key(
            Algorithm::data_key(),
            KeyOptions::new(self.config.attachment_key_size),
        )
    }

    pub fn encrypt_record(&self, record: &DecryptedRecord) -> Result<EncryptedRecord> {
        let tags = self.with_default_tags(&record.resource, record.tags.clone());
        let encrypted_tags = self
            .tag_crypto
            .encrypt_tags_and_annotations(&tags, &record.annotations)?;

        let common_key_id = self.common_keys.fetch_current_common_key_id();
        let common_key = self.common_keys.fetch_common_key(&common_key_id)?;

        let encrypted_data_key = EncryptedKey(self.crypto.wrap_key(
            &common_key,
            KeyType::DataKey,
            &record.data_key,
        )?);

        let encrypted_body = self.encrypt_resource(&record.data_key, &record.resource)?;

        let encrypted_attachments_key = record
            .attachments_key
            .as_ref()
            .map(|key| {
                self.crypto
                    .wrap_key(&common_key, KeyType::AttachmentKey, key)
                    .map(EncryptedKey)
            })
            .transpose()?;

        debug!(common_key_id = %common_key_id, "encrypted record");
        Ok(EncryptedRecord {
            common_key_id,
            identifier: record.identifier.clone(),
            encrypted_tags,
            encrypted_body,
            custom_creation_date: record.custom_creation_date,
            encrypted_data_key,
            encrypted_attachments_key,
            model_version: record.model_version,
            updated_date: record.updated_date,
        })
    }

    pub fn decrypt_record(&self, record: &EncryptedRecord, user_id: &str) -> Result<DecryptedRecord> {
        if !self.is_model_version_supported(record.model_version) {
            warn!(model_version = record.model_version, "rejecting record with unsupported model version");
            return Err(RecordVaultError::ModelVersionNotSupported(record.model_version));
        }

        let (tags, annotations) = self
            .tag_crypto
            .decrypt_tags_and_annotations(&record.encrypted_tags)?;

        let common_key = self.resolve_common_key(user_id, &record.common_key_id)?;

        let data_key = self.crypto.unwrap_key(
            &common_key,
            KeyType::DataKey,
            record.encrypted_data_key.as_str(),
        )?;
        let attachments_key = record
            .encrypted_attachments_key
            .as_ref()
            .map(|wrapped| {
                self.crypto
                    .unwrap_key(&common_key, KeyType::AttachmentKey, wrapped.as_str())
            })
            .transpose()?;

        let resource = self.decrypt_resource(&data_key, &tags, &record.encrypted_body)?;

        debug!(common_key_id = %record.common_key_id, "decrypted record");
        Ok(DecryptedRecord {
            identifier: record.identifier.clone(),
            resource,
            tags,
            annotations,
            custom_creation_date: record.custom_creation_date,
            updated_date: record.updated_date,
            data_key,
            attachments_key,
            model_version: record.model_version,
        })
    }

    /// The common key for `id`: from the secure store, or fetched from the
    /// key-exchange API, unwrapped and stored.
    pub fn resolve_common_key(&self, user_id: &str, id: &str) -> Result<Key> {
        match self.common_keys.fetch_common_key(id) {
            Ok(key) => {
                trace!(common_key_id = %id, "common key cache hit");
                Ok(key)
            }
            Err(RecordVaultError::KeyNotFound(_)) => {
                debug!(common_key_id = %id, "common key not cached, fetching");
                let wrapped = self.api.fetch_common_key(self.store.alias(), user_id, id)?;
                let key_pair = self.store.fetch_app_key_pair()?;
                let key = self.crypto.unwrap_common_key(&key_pair, &wrapped)?;
                self.common_keys.store_common_key(id, &key)?;
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }

    fn with_default_tags(&self, resource: &Resource, mut tags: Tags) -> Tags {
        tags.entry(tag_keys::CLIENT.to_string())
            .or_insert_with(|| self.config.client_id.to_lowercase());
        tags.entry(tag_keys::PARTNER.to_string())
            .or_insert_with(|| self.config.partner_id().to_lowercase());

        // Descriptor tags always reflect the resource; caller values are overwritten or dropped.
        match resource {
            Resource::Data(_) => {
                tags.remove(tag_keys::RESOURCE_TYPE);
                tags.remove(tag_keys::FHIR_VERSION);
                tags.insert(tag_keys::FLAG.to_string(), tag_keys::FLAG_APPDATA.to_string());
            }
            Resource::Fhir3(fhir) | Resource::Fhir4(fhir) => {
                tags.remove(tag_keys::FLAG);
                tags.insert(
                    tag_keys::RESOURCE_TYPE.to_string(),
                    fhir.resource_type.to_lowercase(),
                );
                if let Some(version) = resource.fhir_version() {
                    tags.insert(tag_keys::FHIR_VERSION.to_string(), version.as_tag().to_string());
                }
            }
        }
        tags
    }

    fn encrypt_resource(&self, data_key: &Key, resource: &Resource) -> Result<String> {
        let encrypted = match resource {
            Resource::Data(bytes) => self.crypto.encrypt_bytes(data_key, bytes)?,
            Resource::Fhir3(fhir) | Resource::Fhir4(fhir) => {
                let text = self.parser.serialize(fhir)?;
                self.crypto.encrypt_bytes(data_key, text.as_bytes())?
            }
        };
        Ok(STANDARD.encode(encrypted))
    }

    fn decrypt_resource(&self, data_key: &Key, tags: &Tags, body: &str) -> Result<Resource> {
        let encrypted = STANDARD
            .decode(body)
            .map_err(|_| RecordVaultError::DecryptionFailed)?;
        let plain = self.crypto.decrypt_bytes(data_key, &encrypted)?;

        if tags.get(tag_keys::FLAG).map(String::as_str) == Some(tag_keys::FLAG_APPDATA) {
            return Ok(Resource::Data(plain));
        }

        let resource_type = tags
            .get(tag_keys::RESOURCE_TYPE)
            .ok_or_else(|| RecordVaultError::InvalidRecord("missing resource type tag".into()))?;
        let version = match tags.get(tag_keys::FHIR_VERSION) {
            None => FhirVersion::Stu3,
            Some(tag) => FhirVersion::from_tag(tag).ok_or_else(|| {
                RecordVaultError::InvalidRecord(format!("unsupported fhir version {}", tag))
            })?,
        };
        let text = String::from_utf8(plain).map_err(|_| RecordVaultError::DecryptionFailed)?;
        let fhir = self.parser.deserialize(resource_type, version, &text)?;

        Ok(match version {
            FhirVersion::Stu3 => Resource::Fhir3(fhir),
            FhirVersion::R4 => Resource::Fhir4(fhir),
        })
    }
}

fn normalize_tags(tags: Tags) -> Result<Tags> {
    tags.into_iter()
        .map(|(key, value)| Ok((encoding::normalize(&key)?, encoding::normalize(&value)?)))
        .collect()
}
