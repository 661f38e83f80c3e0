//! Searchable tag and annotation encryption.
//!
//! Each tag (`key=value`) and each annotation (`custom=value`) is encrypted
//! on its own, so the server can match individual encrypted tokens without
//! decrypting the record.
//!
//! Tag tokens use AES-CBC/PKCS#7 under the tag-encryption key with a fixed
//! all-zero IV. Equal plaintext tags therefore produce equal ciphertext,
//! which is what makes equality search on encrypted tokens possible. The
//! cost is that the server learns which records share a tag. Randomising
//! the IV would break search.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, trace};

use crate::crypto::CryptoService;
use crate::encoding;
use crate::error::{RecordVaultError, Result};
use crate::keys::{Key, CBC_IV_LEN};
use crate::secret::SecretBytes;
use crate::storage::CryptoStore;

/// Structured `key -> value` metadata, ordered by key.
pub type Tags = BTreeMap<String, String>;

/// Free-form caller labels.
pub type Annotations = Vec<String>;

/// Separates a tag key from its value.
pub const TAG_DELIMITER: char = '=';

/// Reserved tag key marking an annotation token.
pub const ANNOTATION_KEY: &str = "custom";

const TAG_IV: [u8; CBC_IV_LEN] = [0u8; CBC_IV_LEN];

/// Well-known tag keys written by the record layer.
pub mod tag_keys {
    pub const CLIENT: &str = "client";
    pub const PARTNER: &str = "partner";
    pub const RESOURCE_TYPE: &str = "resourcetype";
    pub const FHIR_VERSION: &str = "fhirversion";
    pub const FLAG: &str = "flag";

    /// Value of the `flag` tag on opaque app-data records.
    pub const FLAG_APPDATA: &str = "appdata";
}

/// Prefix of an annotation token: `custom=`.
pub fn annotation_prefix() -> String {
    format!("{}{}", ANNOTATION_KEY, TAG_DELIMITER)
}

/// Prefix of a tag token for the given key: `{encoded key}=`.
pub fn tag_prefix(key: &str) -> Result<String> {
    let normalized = encoding::normalize(key)?;
    if normalized.contains(TAG_DELIMITER) {
        return Err(RecordVaultError::AnnotationFormatViolation(format!(
            "tag key must not contain '{}'",
            TAG_DELIMITER
        )));
    }
    if normalized == ANNOTATION_KEY {
        return Err(RecordVaultError::AnnotationFormatViolation(format!(
            "tag key '{}' is reserved",
            ANNOTATION_KEY
        )));
    }
    Ok(format!("{}{}", encoding::encode(&normalized)?, TAG_DELIMITER))
}

/// Encrypts and decrypts tag/annotation lists.
pub struct TagCryptoService {
    crypto: Arc<CryptoService>,
    store: Arc<CryptoStore>,
    tag_key_size: usize,
}

impl TagCryptoService {
    pub fn new(crypto: Arc<CryptoService>, store: Arc<CryptoStore>, tag_key_size: usize) -> Self {
        Self {
            crypto,
            store,
            tag_key_size,
        }
    }

    /// The tag-encryption key, created on first use.
    pub fn tag_encryption_key(&self) -> Result<Key> {
        self.store
            .fetch_or_generate_tag_encryption_key(&self.crypto, self.tag_key_size)
    }

    /// Encrypt every tag and annotation into its own base64 token.
    ///
    /// Tags come first (in key order), annotations after (in input order).
    pub fn encrypt_tags_and_annotations(
        &self,
        tags: &Tags,
        annotations: &[String],
    ) -> Result<Vec<String>> {
        let key = self.tag_encryption_key()?;
        let mut tokens = Vec::with_capacity(tags.len() + annotations.len());

        for (tag_key, value) in tags {
            let plain = format!("{}{}", tag_prefix(tag_key)?, encoding::encode(value)?);
            tokens.push(self.encrypt_item(&key, &plain)?);
        }

        let prefix = annotation_prefix();
        for annotation in annotations {
            let plain = format!("{}{}", prefix, encoding::encode(annotation)?);
            tokens.push(self.encrypt_item(&key, &plain)?);
        }

        debug!(
            tags = tags.len(),
            annotations = annotations.len(),
            "encrypted tags and annotations"
        );
        Ok(tokens)
    }

    /// Decrypt tokens and split them into tags and annotations.
    ///
    /// Tokens that decrypt but carry no delimiter are dropped. A token that
    /// fails to decrypt aborts the whole call.
    pub fn decrypt_tags_and_annotations(&self, tokens: &[String]) -> Result<(Tags, Annotations)> {
        let key = self.store.fetch_tag_encryption_key()?;
        let prefix = annotation_prefix();
        let mut tags = Tags::new();
        let mut annotations = Annotations::new();

        for token in tokens {
            let plain = self.decrypt_item(&key, token)?;
            let text = match plain.expose_str() {
                Some(text) => text,
                None => {
                    trace!("dropping non UTF-8 tag token");
                    continue;
                }
            };

            if let Some(value) = text.strip_prefix(&prefix) {
                match encoding::decode(value) {
                    Ok(annotation) => annotations.push(annotation),
                    Err(_) => trace!("dropping undecodable annotation token"),
                }
            } else if let Some((tag_key, value)) = text.split_once(TAG_DELIMITER) {
                match (encoding::decode(tag_key), encoding::decode(value)) {
                    (Ok(tag_key), Ok(value)) => {
                        tags.insert(tag_key, value);
                    }
                    _ => trace!("dropping undecodable tag token"),
                }
            } else {
                trace!("dropping tag token without delimiter");
            }
        }

        Ok((tags, annotations))
    }

    /// Encrypt `prefix + item` for every pre-encoded item.
    pub fn encrypt_list(&self, items: &[String], key: &Key, prefix: &str) -> Result<Vec<String>> {
        items
            .iter()
            .map(|item| self.encrypt_item(key, &format!("{}{}", prefix, item)))
            .collect()
    }

    fn encrypt_item(&self, key: &Key, plain: &str) -> Result<String> {
        let ciphertext = self.crypto.sym_encrypt(key, plain.as_bytes(), &TAG_IV)?;
        Ok(STANDARD.encode(ciphertext))
    }

    fn decrypt_item(&self, key: &Key, token: &str) -> Result<SecretBytes> {
        let ciphertext = STANDARD
            .decode(token)
            .map_err(|_| RecordVaultError::DecryptionFailed)?;
        self.crypto
            .sym_decrypt(key, &ciphertext, &TAG_IV)
            .map(SecretBytes::new)
    }
}
