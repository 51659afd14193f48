//! Flat object-store adapter.
//!
//! One implementation of folder semantics for every [`ObjectClient`]: each
//! operation issues a single prefix listing, analyses it with
//! [`KeySpace`], and acts on that snapshot only.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

use cloudio_common::{
    BackendKind, BucketKey, KeySpace, Metadata, ObjectClient, StorageError, StoragePath,
    StorageResult,
};

use super::{PathStatus, StorageBackend};

pub struct FlatStoreBackend<C> {
    kind: BackendKind,
    client: C,
}

impl<C: ObjectClient> FlatStoreBackend<C> {
    pub fn new(kind: BackendKind, client: C) -> Self {
        Self { kind, client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn analyse(&self, path: &StoragePath) -> StorageResult<(BucketKey, KeySpace)> {
        let location = path.bucket_key()?;
        let keys = self.client.list(&location.bucket, &location.key).await?;
        let space = KeySpace::analyse(&location, keys);
        debug!(
            path = %path,
            is_file = space.is_file(),
            is_dir = space.is_dir(),
            "Analysed path"
        );
        Ok((location, space))
    }

    fn object_location(&self, path: &StoragePath) -> StorageResult<BucketKey> {
        let location = path.bucket_key()?;
        if location.whole_bucket {
            return Err(StorageError::Unsupported(format!(
                "{} names a bucket, not an object",
                path
            )));
        }
        Ok(location)
    }
}

#[async_trait]
impl<C: ObjectClient> StorageBackend for FlatStoreBackend<C> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn stat(&self, path: &StoragePath) -> StorageResult<PathStatus> {
        let (_, space) = self.analyse(path).await?;
        Ok(PathStatus {
            is_file: space.is_file(),
            is_dir: space.is_dir(),
        })
    }

    async fn listdir(
        &self,
        path: &StoragePath,
        recursive: bool,
        exclude_folders: bool,
    ) -> StorageResult<Vec<String>> {
        let (_, space) = self.analyse(path).await?;
        space.require_dir(&path.to_string())?;
        Ok(space.listing(recursive, exclude_folders))
    }

    async fn remove(&self, path: &StoragePath) -> StorageResult<()> {
        if path.bucket_key()?.whole_bucket {
            return Err(StorageError::Unsupported(format!(
                "refusing to remove every object in bucket {}",
                path
            )));
        }
        let (location, space) = self.analyse(path).await?;
        if !space.exists() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        for key in space.owned_keys() {
            self.client.delete(&location.bucket, key).await?;
        }
        info!(path = %path, objects = space.owned_keys().len(), "Removed");
        Ok(())
    }

    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes> {
        let location = self.object_location(path)?;
        Ok(self.client.get(&location.bucket, &location.key).await?)
    }

    async fn write(&self, path: &StoragePath, data: Bytes, metadata: &Metadata) -> StorageResult<()> {
        let location = self.object_location(path)?;
        self.client
            .put(&location.bucket, &location.key, data, metadata)
            .await?;
        Ok(())
    }

    async fn upload_file(&self, path: &StoragePath, local: &Path) -> StorageResult<()> {
        let location = self.object_location(path)?;
        self.client
            .put_file(&location.bucket, &location.key, local)
            .await?;
        debug!(path = %path, local = %local.display(), "Uploaded local file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudio_common::InMemoryClient;

    fn backend(objects: &[&str]) -> FlatStoreBackend<InMemoryClient> {
        let client = InMemoryClient::with_objects(
            "bucket",
            objects.iter().map(|k| (*k, &b"data"[..])),
        );
        FlatStoreBackend::new(BackendKind::S3, client)
    }

    fn path(raw: &str) -> StoragePath {
        StoragePath::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_listdir_scenario() {
        let backend = backend(&["dir/file1.txt", "dir/sub/file2.txt"]);
        let p = path("s3://bucket/dir");
        assert_eq!(backend.listdir(&p, false, false).await.unwrap(), vec!["file1.txt", "sub/"]);
        assert_eq!(
            backend.listdir(&p, true, true).await.unwrap(),
            vec!["file1.txt", "sub/file2.txt"]
        );
    }

    #[tokio::test]
    async fn test_listdir_errors() {
        let backend = backend(&["dir/file1.txt"]);
        let err = backend.listdir(&path("s3://bucket/missing"), false, false).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        let err = backend.listdir(&path("s3://bucket/dir/file1.txt"), false, false).await.unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_stat_is_idempotent() {
        let backend = backend(&["a", "a/b"]);
        let p = path("s3://bucket/a/");
        let first = backend.stat(&p).await.unwrap();
        let second = backend.stat(&p).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_file && first.is_dir);
    }

    #[tokio::test]
    async fn test_remove_folder_spares_prefix_siblings() {
        let backend = backend(&["a/1", "a/2/3", "ab/c", "a"]);
        backend.remove(&path("s3://bucket/a")).await.unwrap();
        assert!(backend.client().contains("bucket", "ab/c"));
        assert_eq!(backend.client().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing() {
        let backend = backend(&["ab/c"]);
        let err = backend.remove(&path("s3://bucket/a")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_bucket_root_refused() {
        let backend = backend(&["top.txt", "dir/inner.txt"]);
        for raw in ["s3://bucket", "s3://bucket/"] {
            let err = backend.remove(&path(raw)).await.unwrap_err();
            assert!(matches!(err, StorageError::Unsupported(_)));
        }
        assert_eq!(backend.client().len(), 2);
    }

    #[tokio::test]
    async fn test_write_then_read_with_metadata() {
        let backend = backend(&[]);
        let p = path("gs://bucket/out/data.bin");
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), "unit".to_string());

        backend
            .write(&p, Bytes::from_static(b"\xff\x00payload"), &metadata)
            .await
            .unwrap();
        assert_eq!(backend.read(&p).await.unwrap(), Bytes::from_static(b"\xff\x00payload"));
        assert_eq!(backend.client().metadata("bucket", "out/data.bin").unwrap()["source"], "unit");
    }

    #[tokio::test]
    async fn test_write_to_bucket_root_rejected() {
        let backend = backend(&[]);
        let err = backend
            .write(&path("s3://bucket"), Bytes::new(), &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_whole_bucket_listing() {
        let backend = backend(&["top.txt", "dir/inner.txt"]);
        let listing = backend.listdir(&path("s3://bucket/"), false, false).await.unwrap();
        assert_eq!(listing, vec!["dir/", "top.txt"]);
    }
}
