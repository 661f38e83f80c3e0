//! Search expressions over encrypted tags.
//!
//! A search expression is a comma-separated AND of OR-groups. Groups with
//! more than one distinct value are parenthesised:
//!
//! ```text
//! ["a","a","b"], ["c"], ["e","f"]   ->   (a,b),c,(e,f)
//! ```
//!
//! Duplicate values inside a group and duplicate whole groups are dropped,
//! keeping first occurrences in order.

use std::collections::HashSet;
use std::fmt;

use crate::encoding::CompatibilityEncoder;
use crate::error::Result;
use crate::keys::Key;
use crate::tags::{self, TagCryptoService};

/// A sealed search expression, sent as a single query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchExpression(String);

impl SearchExpression {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SearchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collects OR-groups and formats them as one AND expression.
#[derive(Debug, Default, Clone)]
pub struct SearchTagBuilder {
    groups: Vec<Vec<String>>,
}

impl SearchTagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one OR-group: alternatives for the same logical filter.
    pub fn add_or_tuple<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.push(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn seal(self) -> SearchExpression {
        let mut seen_groups = HashSet::new();
        let formatted: Vec<String> = self
            .groups
            .iter()
            .filter_map(|group| format_group(group))
            .filter(|group| seen_groups.insert(group.clone()))
            .collect();
        SearchExpression(formatted.join(","))
    }
}

fn format_group(values: &[String]) -> Option<String> {
    let mut seen = HashSet::new();
    let unique: Vec<&str> = values
        .iter()
        .map(String::as_str)
        .filter(|value| seen.insert(*value))
        .collect();

    match unique.len() {
        0 => None,
        1 => Some(unique[0].to_string()),
        _ => Some(format!("({})", unique.join(","))),
    }
}

/// Builds search expressions that match records written by any client
/// generation.
///
/// Every logical tag becomes one OR-group of four tokens, one per client
/// generation. A generation encodes the tag key and the value the same way,
/// so the `n`th token pairs the `n`th key encoding with the `n`th value
/// encoding. Each token is encrypted under the tag-encryption key.
pub struct CompatibilityTagBuilder<'a> {
    tag_crypto: &'a TagCryptoService,
    key: Key,
    builder: SearchTagBuilder,
}

impl<'a> CompatibilityTagBuilder<'a> {
    pub fn new(tag_crypto: &'a TagCryptoService) -> Result<Self> {
        Ok(Self {
            key: tag_crypto.tag_encryption_key()?,
            tag_crypto,
            builder: SearchTagBuilder::new(),
        })
    }

    /// Filter on a `key=value` tag.
    pub fn add_tag(mut self, key: &str, value: &str) -> Result<Self> {
        // Rejects reserved and delimited keys.
        tags::tag_prefix(key)?;
        let keys = CompatibilityEncoder::encode(key)?;
        let values = CompatibilityEncoder::encode(value)?;
        let plain: Vec<String> = keys
            .encodings()
            .iter()
            .zip(values.encodings().iter())
            .map(|(k, v)| format!("{}{}{}", k, tags::TAG_DELIMITER, v))
            .collect();
        self.add_encrypted_group(&plain, "")?;
        Ok(self)
    }

    /// Filter on an annotation.
    pub fn add_annotation(mut self, annotation: &str) -> Result<Self> {
        let plain: Vec<String> = CompatibilityEncoder::encode(annotation)?
            .encodings()
            .iter()
            .map(|e| e.to_string())
            .collect();
        self.add_encrypted_group(&plain, &tags::annotation_prefix())?;
        Ok(self)
    }

    pub fn seal(self) -> SearchExpression {
        self.builder.seal()
    }

    fn add_encrypted_group(&mut self, plain: &[String], prefix: &str) -> Result<()> {
        let encrypted = self.tag_crypto.encrypt_list(plain, &self.key, prefix)?;
        self.builder = std::mem::take(&mut self.builder).add_or_tuple(encrypted);
        Ok(())
    }
}
