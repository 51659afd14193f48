use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;

/// User metadata attached to an object on write.
pub type Metadata = HashMap<String, String>;

/// Trait implemented by flat object-store clients.
///
/// A client handles the raw wire calls for one vendor (S3, GCS) and knows
/// nothing about folders; folder semantics are layered on top by
/// [`crate::keyspace::KeySpace`].
#[async_trait::async_trait]
pub trait ObjectClient: Send + Sync {
    /// List every key in `bucket` that starts with `prefix`.
    async fn list(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<String>>;

    /// Download an object.
    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<bytes::Bytes>;

    /// Upload an object, replacing any existing one.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: bytes::Bytes,
        metadata: &Metadata,
    ) -> anyhow::Result<()>;

    /// Delete an object.
    async fn delete(&self, bucket: &str, key: &str) -> anyhow::Result<()>;

    /// Upload a local file. Clients that can stream override this.
    async fn put_file(&self, bucket: &str, key: &str, local: &Path) -> anyhow::Result<()> {
        let data = tokio::fs::read(local)
            .await
            .with_context(|| format!("Failed to read {}", local.display()))?;
        self.put(bucket, key, data.into(), &Metadata::new()).await
    }
}
