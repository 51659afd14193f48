pub mod dropbox;
pub mod flat;
pub mod gcs;
pub mod local;
pub mod s3;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use cloudio_common::{BackendKind, Metadata, StorageError, StoragePath, StorageResult};

use crate::config::CloudConfig;

use self::dropbox::DropboxBackend;
use self::flat::FlatStoreBackend;
use self::gcs::GcsClient;
use self::local::LocalBackend;
use self::s3::S3Client;

/// What a path currently is. Flat stores may report both at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathStatus {
    pub is_file: bool,
    pub is_dir: bool,
}

impl PathStatus {
    pub fn exists(&self) -> bool {
        self.is_file || self.is_dir
    }
}

/// Capability set shared by every backend.
///
/// Paths arrive already classified and canonicalized; an adapter only
/// ever sees paths of its own [`BackendKind`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn stat(&self, path: &StoragePath) -> StorageResult<PathStatus>;

    /// List a folder. Folder entries end in `/`.
    async fn listdir(
        &self,
        path: &StoragePath,
        recursive: bool,
        exclude_folders: bool,
    ) -> StorageResult<Vec<String>>;

    /// Remove a file, or a folder with everything below it.
    async fn remove(&self, path: &StoragePath) -> StorageResult<()>;

    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes>;

    async fn write(&self, path: &StoragePath, data: Bytes, metadata: &Metadata) -> StorageResult<()>;

    /// Store the content of a local file at `path`.
    async fn upload_file(&self, path: &StoragePath, local: &Path) -> StorageResult<()> {
        let data = tokio::fs::read(local).await?;
        self.write(path, data.into(), &Metadata::new()).await
    }
}

/// Construct the adapter for `kind`.
///
/// Credentials are resolved here, once, so a missing key fails before any
/// network call is made.
pub fn build(kind: BackendKind, config: &CloudConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match kind {
        BackendKind::Local => Arc::new(LocalBackend::new()),
        BackendKind::S3 => {
            let client = S3Client::new(config.s3.resolve()?)?;
            Arc::new(FlatStoreBackend::new(kind, client))
        }
        BackendKind::GoogleStorage => {
            let client = GcsClient::new(config.gcs.resolve()?)?;
            Arc::new(FlatStoreBackend::new(kind, client))
        }
        BackendKind::Dropbox => Arc::new(DropboxBackend::new(config.dropbox.resolve()?)?),
        BackendKind::GoogleDrive => {
            return Err(StorageError::Unsupported(format!(
                "{} paths are recognized but no Google Drive adapter is available",
                kind.prefix()
            )))
        }
    };
    debug!(backend = %kind, "Backend constructed");
    Ok(backend)
}

/// Content type for an uploaded key.
pub(crate) fn content_type(key: &str) -> String {
    mime_guess::from_path(key)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Shared HTTP client settings for the remote adapters.
pub(crate) fn http_client() -> StorageResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .map_err(|e| StorageError::Config(format!("Failed to build HTTP client: {}", e)))
}
