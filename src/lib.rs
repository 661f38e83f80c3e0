//! # recordvault
//!
//! Client-side cryptographic core for zero-knowledge health records.
//!
//! Records are encrypted on the device before they leave it. Alongside the
//! encrypted body, every record carries *searchable* encrypted tags and
//! annotations so a server that never sees plaintext can still filter by
//! resource type, date or custom label.
//!
//! ## Key hierarchy
//!
//! ```text
//! app key pair (RSA-OAEP)  --unwraps-->  common key (AES-GCM, rotates by id)
//! common key               --wraps---->  data key / attachments key (AES-GCM)
//! data key                 --encrypts->  resource body
//! tag-encryption key (AES-CBC, fixed IV) --encrypts--> tags and annotations
//! ```
//!
//! ## Public API
//!
//! [`RecordEncryptionService`] is the entry point for record round trips.
//! [`TagCryptoService`], [`SearchTagBuilder`] and [`CompatibilityTagBuilder`]
//! build server-side search expressions. The secure store, the network
//! key-exchange API and the resource parser are supplied by the embedding
//! application through [`SecureStore`], [`CommonKeyApi`] and [`ResourceParser`].

pub mod common_key;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod exchange;
pub mod key_factory;
pub mod keys;
pub mod record;
pub mod remote;
pub mod resource;
pub mod search;
pub mod secret;
pub mod storage;
pub mod tags;

pub use common_key::{CommonKeyService, DEFAULT_COMMON_KEY_ID};
pub use config::CryptoConfig;
pub use crypto::{init_crypto_provider, CryptoService};
pub use encoding::{CompatibilityEncoder, CompatibilityTag};
pub use error::{RecordVaultError, Result};
pub use exchange::{ExchangeKey, KeyType, KEY_VERSION};
pub use keys::{Algorithm, AsymmetricKeyPair, Key, KeyOptions, SymmetricKey};
pub use record::{DecryptedRecord, EncryptedKey, EncryptedRecord, RecordEncryptionService};
pub use remote::CommonKeyApi;
pub use resource::{FhirResource, FhirVersion, JsonResourceParser, Resource, ResourceParser};
pub use search::{CompatibilityTagBuilder, SearchExpression, SearchTagBuilder};
pub use secret::SecretBytes;
pub use storage::{CryptoStore, InMemorySecureStore, SecureStore};
pub use tags::{Annotations, TagCryptoService, Tags};
