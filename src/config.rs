//! Crypto core configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for the record crypto core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// User alias. Prefixes every secure-store name.
    pub alias: String,

    /// Client id in `partner#platform` form. Written into every record's tags.
    pub client_id: String,

    /// Model version written into new records.
    pub current_model_version: u32,

    /// Oldest model version this implementation can still decrypt.
    pub min_model_version: u32,

    /// Per-record data key size in bits.
    pub data_key_size: usize,

    /// Attachments key size in bits.
    pub attachment_key_size: usize,

    /// Tag-encryption key size in bits.
    pub tag_key_size: usize,

    /// Common key size in bits.
    pub common_key_size: usize,

    /// RSA modulus size of the app key pair in bits.
    pub app_key_size: usize,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            alias: "default".to_string(),
            client_id: "recordvault#rust".to_string(),
            current_model_version: 1,
            min_model_version: 1,
            data_key_size: 256,
            attachment_key_size: 256,
            tag_key_size: 256,
            common_key_size: 256,
            app_key_size: 2048,
        }
    }
}

impl CryptoConfig {
    /// Load a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The partner id: the part of the client id before `#`.
    pub fn partner_id(&self) -> &str {
        self.client_id
            .split_once('#')
            .map(|(partner, _)| partner)
            .unwrap_or(&self.client_id)
    }

    /// Whether records written with `version` may be decrypted.
    pub fn supports_model_version(&self, version: u32) -> bool {
        (self.min_model_version..=self.current_model_version).contains(&version)
    }
}
