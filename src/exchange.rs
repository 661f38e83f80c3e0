//! Exchange keys: the wire and storage form of every key.
//!
//! ```text
//! {"t": "dk", "priv": null, "pub": null, "sym": "<base64>", "v": 1}
//! ```
//!
//! `t` is the key type discriminant, `priv`/`pub` carry base64 DER RSA
//! halves and `sym` carries base64 AES key bytes. Exactly the fields the
//! type needs are populated; anything else is rejected at decode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RecordVaultError, Result};
use crate::secret::SecretBytes;

/// The only exchange-key version this implementation reads or writes.
pub const KEY_VERSION: u32 = 1;

/// Key type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    AppPublicKey,
    AppPrivateKey,
    CommonKey,
    DataKey,
    AttachmentKey,
    TagKey,
}

impl KeyType {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::AppPublicKey => "apub",
            Self::AppPrivateKey => "apriv",
            Self::CommonKey => "ck",
            Self::DataKey => "dk",
            Self::AttachmentKey => "ak",
            Self::TagKey => "tk",
        }
    }

    pub fn from_wire(value: &str) -> Result<Self> {
        match value {
            "apub" => Ok(Self::AppPublicKey),
            "apriv" => Ok(Self::AppPrivateKey),
            "ck" => Ok(Self::CommonKey),
            "dk" => Ok(Self::DataKey),
            "ak" => Ok(Self::AttachmentKey),
            "tk" => Ok(Self::TagKey),
            other => Err(RecordVaultError::InvalidKeyType(other.to_string())),
        }
    }

    /// Whether this type carries AES key bytes.
    pub fn is_symmetric(&self) -> bool {
        !matches!(self, Self::AppPublicKey | Self::AppPrivateKey)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Serialised shape. Only used at the JSON boundary.
#[derive(Serialize, Deserialize)]
struct WireExchangeKey {
    t: String,
    #[serde(rename = "priv", default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
    #[serde(rename = "pub", default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    #[serde(rename = "sym", default, skip_serializing_if = "Option::is_none")]
    symmetric_key: Option<String>,
    #[serde(default)]
    v: u32,
}

/// Transferable representation of a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeKey {
    key_type: KeyType,
    private_key: Option<SecretBytes>,
    public_key: Option<String>,
    symmetric_key: Option<SecretBytes>,
    version: u32,
}

impl ExchangeKey {
    /// A symmetric exchange key (common, data, attachment or tag key).
    pub fn symmetric(key_type: KeyType, symmetric_b64: SecretBytes, version: u32) -> Result<Self> {
        Self::validated(key_type, None, None, Some(symmetric_b64), version)
    }

    /// The app key pair: base64 PKCS#8 private and X.509 public halves.
    pub fn key_pair(private_b64: SecretBytes, public_b64: String, version: u32) -> Result<Self> {
        Self::validated(
            KeyType::AppPrivateKey,
            Some(private_b64),
            Some(public_b64),
            None,
            version,
        )
    }

    /// The public half alone, as published to the key-exchange API.
    pub fn public_key(public_b64: String, version: u32) -> Result<Self> {
        Self::validated(KeyType::AppPublicKey, None, Some(public_b64), None, version)
    }

    fn validated(
        key_type: KeyType,
        private_key: Option<SecretBytes>,
        public_key: Option<String>,
        symmetric_key: Option<SecretBytes>,
        version: u32,
    ) -> Result<Self> {
        if version != KEY_VERSION {
            return Err(RecordVaultError::InvalidKeyVersion(version));
        }

        let shape_ok = match key_type {
            KeyType::AppPublicKey => {
                private_key.is_none() && public_key.is_some() && symmetric_key.is_none()
            }
            KeyType::AppPrivateKey => {
                private_key.is_some() && public_key.is_some() && symmetric_key.is_none()
            }
            _ => private_key.is_none() && public_key.is_none() && symmetric_key.is_some(),
        };
        if !shape_ok {
            return Err(RecordVaultError::KeyMaterialInvalid(format!(
                "fields do not match key type {}",
                key_type
            )));
        }

        Ok(Self {
            key_type,
            private_key,
            public_key,
            symmetric_key,
            version,
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn private_key_b64(&self) -> Option<&SecretBytes> {
        self.private_key.as_ref()
    }

    pub fn public_key_b64(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    pub fn symmetric_key_b64(&self) -> Option<&SecretBytes> {
        self.symmetric_key.as_ref()
    }

    /// Serialise to the JSON wire form.
    pub fn to_json(&self) -> Result<SecretBytes> {
        let wire = WireExchangeKey {
            t: self.key_type.as_wire().to_string(),
            private_key: self.private_key.as_ref().map(secret_to_string).transpose()?,
            public_key: self.public_key.clone(),
            symmetric_key: self.symmetric_key.as_ref().map(secret_to_string).transpose()?,
            v: self.version,
        };
        Ok(SecretBytes::new(serde_json::to_vec(&wire)?))
    }

    /// Parse the JSON wire form, checking type, version and field population.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let wire: WireExchangeKey = serde_json::from_slice(json)?;
        let key_type = KeyType::from_wire(&wire.t)?;
        Self::validated(
            key_type,
            wire.private_key.map(SecretBytes::from),
            wire.public_key,
            wire.symmetric_key.map(SecretBytes::from),
            wire.v,
        )
    }
}

fn secret_to_string(secret: &SecretBytes) -> Result<String> {
    secret
        .expose_str()
        .map(str::to_owned)
        .ok_or_else(|| RecordVaultError::KeyMaterialInvalid("key text is not UTF-8".into()))
}
