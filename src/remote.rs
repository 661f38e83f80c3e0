//! Network key-exchange collaborator.

use crate::error::Result;

/// Delivers common keys wrapped (RSA-OAEP) under the user's app public key.
///
/// Implementations perform the HTTP call, retries and authentication; the
/// core only sees the wrapped bytes or an error. Calls are blocking from
/// the core's point of view.
pub trait CommonKeyApi: Send + Sync {
    fn fetch_common_key(&self, alias: &str, user_id: &str, common_key_id: &str) -> Result<Vec<u8>>;
}
