//! Tag value canonicalisation and percent-encoding.
//!
//! The canonical form of a tag value is: trimmed, lower-cased, every byte
//! outside `[a-z0-9]` percent-escaped, escapes in lowercase hex:
//!
//! ```text
//! "  My Tag-1 "  ->  "my%20tag%2d1"
//! ```
//!
//! Older clients stored the same logical value under other encodings.
//! [`CompatibilityEncoder`] produces all of them so a search can match
//! records written by any client generation.

use tracing::trace;

use crate::error::{RecordVaultError, Result};

/// Escapes the historical JS client left as literals.
///
/// Reverse-engineered from one client generation; other generations may
/// need further entries.
const JS_LEGACY_LITERALS: [(&str, char); 5] = [
    ("%2a", '*'),
    ("%2d", '-'),
    ("%2e", '.'),
    ("%5f", '_'),
    ("%7e", '~'),
];

/// Trim and lower-case a tag value. Blank input is rejected.
pub fn normalize(value: &str) -> Result<String> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(RecordVaultError::AnnotationViolation);
    }
    Ok(normalized)
}

/// Canonical encoding: normalise, escape, lower-case the escapes.
pub fn encode(value: &str) -> Result<String> {
    let normalized = normalize(value)?;
    Ok(lowercase_escapes(&escape_all(&normalized)))
}

/// Percent-decode an encoded tag value.
pub fn decode(value: &str) -> Result<String> {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| RecordVaultError::AnnotationFormatViolation("tag is not valid UTF-8".into()))
}

/// Escape every byte outside `[A-Za-z0-9]`, uppercase hex.
///
/// `urlencoding` leaves `- . _ ~` unescaped; those are escaped afterwards.
fn escape_all(value: &str) -> String {
    let encoded = urlencoding::encode(value);
    let mut out = String::with_capacity(encoded.len());
    for c in encoded.chars() {
        match c {
            '-' => out.push_str("%2D"),
            '.' => out.push_str("%2E"),
            '_' => out.push_str("%5F"),
            '~' => out.push_str("%7E"),
            other => out.push(other),
        }
    }
    out
}

/// Lower-case the two hex digits of every `%XX` escape, leaving the rest alone.
fn lowercase_escapes(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '%' {
            for _ in 0..2 {
                if let Some(hex) = chars.next() {
                    out.push(hex.to_ascii_lowercase());
                }
            }
        }
    }
    out
}

/// Replace the JS legacy escapes by their literals. Other escapes keep their case.
fn apply_js_legacy(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let literal = rest.get(pos..pos + 3).and_then(|escape| {
            JS_LEGACY_LITERALS
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(escape))
                .map(|(_, literal)| *literal)
        });
        match literal {
            Some(literal) => {
                out.push(literal);
                rest = &rest[pos + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// The same logical tag value under every known encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompatibilityTag {
    /// Current canonical encoding.
    pub valid_encoding: String,
    /// Normalised value without escaping (shared-code clients).
    pub kmp_legacy_encoding: String,
    /// iOS encoding with the JS literal substitutions applied.
    pub js_legacy_encoding: String,
    /// Escaped with uppercase hex, no lower-casing of escapes.
    pub ios_legacy_encoding: String,
}

impl CompatibilityTag {
    /// All four encodings, canonical first.
    pub fn encodings(&self) -> [&str; 4] {
        [
            &self.valid_encoding,
            &self.kmp_legacy_encoding,
            &self.js_legacy_encoding,
            &self.ios_legacy_encoding,
        ]
    }
}

/// Produces the parallel legacy encodings of a tag value.
pub struct CompatibilityEncoder;

impl CompatibilityEncoder {
    pub fn encode(value: &str) -> Result<CompatibilityTag> {
        let normalized = normalize(value)?;
        let ios = escape_all(&normalized);
        let tag = CompatibilityTag {
            valid_encoding: lowercase_escapes(&ios),
            kmp_legacy_encoding: normalized.clone(),
            js_legacy_encoding: apply_js_legacy(&ios),
            ios_legacy_encoding: ios,
        };
        trace!("computed compatibility encodings");
        Ok(tag)
    }
}
