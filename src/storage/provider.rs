use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Storage provider trait
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store data under `name`. Either the whole blob becomes visible or nothing does.
    async fn put(&self, name: &str, data: Bytes) -> Result<()>;

    /// Read data back from storage
    async fn get(&self, name: &str) -> Result<Bytes>;

    /// Remove data from storage. Removing something already gone succeeds.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
