//! Port interfaces for durable storage

use async_trait::async_trait;
use circlepay_domain::Result;

/// String-keyed durable key/value store
///
/// Mirrors the primitive offered by mobile storage layers. The persistent
/// cache and the credential store are built entirely on top of it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    async fn multi_remove(&self, keys: &[String]) -> Result<()>;

    async fn all_keys(&self) -> Result<Vec<String>>;
}
