//! The router: one blocking API over every backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use cloudio_common::{classify, BackendKind, StorageError, StoragePath, StorageResult};

use crate::backend::{self, PathStatus, StorageBackend};
use crate::batch::{self, BatchOptions, BatchReport};
use crate::cache::ListingCache;
use crate::config::CloudConfig;
use crate::file::{CloudFile, OpenMode};

type Registry = HashMap<BackendKind, Arc<dyn StorageBackend>>;

/// A path bound to the adapter that serves it, for the length of one call.
struct Resolved {
    path: StoragePath,
    backend: Arc<dyn StorageBackend>,
}

/// Routes every operation to the adapter for the path's backend.
///
/// Adapters are built on first use and kept for the life of the interface,
/// at most one per backend kind. Nothing else carries over between calls.
pub struct CloudInterface {
    config: CloudConfig,
    runtime: Arc<Runtime>,
    backends: Mutex<Registry>,
    /// Adapters registered with [`CloudInterface::with_backend`]; batch
    /// workers receive these too.
    injected: Registry,
    cache: ListingCache,
}

impl CloudInterface {
    pub fn new(config: CloudConfig) -> StorageResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .thread_name("cloudio-io")
            .build()?;
        let cache = ListingCache::new(config.cache_dir());
        Ok(Self {
            config,
            runtime: Arc::new(runtime),
            backends: Mutex::new(HashMap::new()),
            injected: HashMap::new(),
            cache,
        })
    }

    /// Use `backend` for its kind instead of building one from config.
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        let kind = backend.kind();
        self.registry().insert(kind, backend.clone());
        self.injected.insert(kind, backend);
        self
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    pub fn cache(&self) -> &ListingCache {
        &self.cache
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // The map is only ever inserted into, so a poisoned lock is still usable.
        self.backends.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn backend(&self, kind: BackendKind) -> StorageResult<Arc<dyn StorageBackend>> {
        if let Some(existing) = self.registry().get(&kind) {
            return Ok(existing.clone());
        }
        // Built outside the lock; if two threads race, the first insert wins.
        let built = backend::build(kind, &self.config)?;
        let mut registry = self.registry();
        let backend = registry.entry(kind).or_insert(built).clone();
        Ok(backend)
    }

    /// Classify `path` and make sure its adapter exists.
    pub fn identify_path_type(&self, path: &str) -> StorageResult<BackendKind> {
        let kind = classify(path)?;
        self.backend(kind)?;
        Ok(kind)
    }

    fn resolve(&self, path: &str) -> StorageResult<Resolved> {
        let path = StoragePath::parse(path)?;
        let backend = self.backend(path.kind())?;
        debug!(path = %path, backend = %path.kind(), "Resolved path");
        Ok(Resolved { path, backend })
    }

    pub fn open(&self, path: &str, mode: &str) -> StorageResult<CloudFile> {
        let mode = OpenMode::parse(mode)?;
        let Resolved { path, backend } = self.resolve(path)?;
        CloudFile::open(backend, self.runtime.clone(), path, mode)
    }

    /// Write `content` to `path`, replacing whatever is there.
    pub fn save(&self, path: &str, content: impl AsRef<[u8]>) -> StorageResult<()> {
        self.open(path, "wb")?.write(content)
    }

    /// Read the whole file at `path`.
    pub fn fetch(&self, path: &str) -> StorageResult<Bytes> {
        self.open(path, "rb")?.read()
    }

    pub fn stat(&self, path: &str) -> StorageResult<PathStatus> {
        let resolved = self.resolve(path)?;
        self.runtime.block_on(resolved.backend.stat(&resolved.path))
    }

    pub fn isfile(&self, path: &str) -> StorageResult<bool> {
        Ok(self.stat(path)?.is_file)
    }

    pub fn isdir(&self, path: &str) -> StorageResult<bool> {
        Ok(self.stat(path)?.is_dir)
    }

    pub fn remove(&self, path: &str) -> StorageResult<()> {
        let resolved = self.resolve(path)?;
        self.runtime.block_on(resolved.backend.remove(&resolved.path))
    }

    pub fn listdir(
        &self,
        path: &str,
        recursive: bool,
        exclude_folders: bool,
    ) -> StorageResult<Vec<String>> {
        let resolved = self.resolve(path)?;
        self.runtime.block_on(
            resolved
                .backend
                .listdir(&resolved.path, recursive, exclude_folders),
        )
    }

    /// [`CloudInterface::listdir`] memoized on disk.
    pub fn cached_listdir(
        &self,
        path: &str,
        recursive: bool,
        exclude_folders: bool,
    ) -> StorageResult<Vec<String>> {
        let canonical = StoragePath::parse(path)?.to_string();
        let recursive_arg = recursive.to_string();
        let exclude_arg = exclude_folders.to_string();
        self.cache.get_or_insert_with(
            "listdir",
            &[canonical.as_str(), recursive_arg.as_str(), exclude_arg.as_str()],
            || self.listdir(path, recursive, exclude_folders),
        )
    }

    /// Copy one file. A local source going to a flat object store is handed
    /// to the adapter as a file so it can be streamed.
    pub fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.resolve(from)?;
        let dest = self.resolve(to)?;

        if source.path.kind() == BackendKind::Local && dest.path.kind().is_flat() {
            let status = self.runtime.block_on(source.backend.stat(&source.path))?;
            if !status.is_file {
                return Err(StorageError::NotFound(source.path.to_string()));
            }
            let mut file = CloudFile::open(
                dest.backend,
                self.runtime.clone(),
                dest.path,
                OpenMode::parse("wb")?,
            )?;
            file.upload_from(&source.path.local_path())?;
        } else {
            let data = CloudFile::open(
                source.backend,
                self.runtime.clone(),
                source.path,
                OpenMode::parse("rb")?,
            )?
            .read()?;
            CloudFile::open(
                dest.backend,
                self.runtime.clone(),
                dest.path,
                OpenMode::parse("wb")?,
            )?
            .write(data)?;
        }
        debug!(from = %from, to = %to, "Copied");
        Ok(())
    }

    /// Copy, then remove the source. A failure in between leaves both.
    pub fn move_file(&self, from: &str, to: &str) -> StorageResult<()> {
        self.copy(from, to)?;
        self.remove(from)?;
        info!(from = %from, to = %to, "Moved");
        Ok(())
    }

    /// Copy every file below `source` to the same place below `dest`.
    pub fn copy_dir(&self, source: &str, dest: &str, options: &BatchOptions) -> StorageResult<BatchReport> {
        batch::copy_dir(self, source, dest, options)
    }

    /// Copy each `(from, to)` pair; failures are logged and reported.
    pub fn copy_batch<I>(&self, pairs: I, workers: usize) -> BatchReport
    where
        I: IntoIterator<Item = (String, String)>,
    {
        batch::copy_pairs(self, pairs.into_iter().collect(), workers)
    }

    /// A fresh interface for a batch worker: same config and injected
    /// adapters, its own runtime and its own lazily built adapters.
    pub(crate) fn worker(&self) -> StorageResult<CloudInterface> {
        let mut worker = CloudInterface::new(self.config.clone())?;
        for backend in self.injected.values() {
            worker = worker.with_backend(backend.clone());
        }
        Ok(worker)
    }
}

impl std::fmt::Debug for CloudInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.registry().keys().map(|k| k.name()).collect();
        kinds.sort();
        f.debug_struct("CloudInterface")
            .field("config", &self.config)
            .field("backends", &kinds)
            .finish()
    }
}
