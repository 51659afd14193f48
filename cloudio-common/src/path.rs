//! Path classification and canonicalization.
//!
//! Every public operation starts here: a raw string is formatted once,
//! claimed by exactly one backend, and turned into a [`StoragePath`] that
//! later stages consume without re-deriving slashes or prefixes.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// The backend a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    Local,
    S3,
    GoogleStorage,
    Dropbox,
    GoogleDrive,
}

impl BackendKind {
    /// Remote schemes in the order they are matched.
    pub const REMOTE: [BackendKind; 4] = [
        BackendKind::S3,
        BackendKind::GoogleStorage,
        BackendKind::Dropbox,
        BackendKind::GoogleDrive,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            BackendKind::Local => "",
            BackendKind::S3 => "s3://",
            BackendKind::GoogleStorage => "gs://",
            BackendKind::Dropbox => "dbx://",
            BackendKind::GoogleDrive => "gdrive://",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::S3 => "s3",
            BackendKind::GoogleStorage => "gcs",
            BackendKind::Dropbox => "dropbox",
            BackendKind::GoogleDrive => "gdrive",
        }
    }

    /// Flat object stores have no native folders; see [`crate::keyspace`].
    pub fn is_flat(self) -> bool {
        matches!(self, BackendKind::S3 | BackendKind::GoogleStorage)
    }

    pub fn remote_prefixes() -> Vec<&'static str> {
        Self::REMOTE.iter().map(|k| k.prefix()).collect()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Strip surrounding whitespace from every `/`-delimited segment.
pub fn format_path(raw: &str) -> String {
    raw.split('/').map(str::trim).collect::<Vec<_>>().join("/")
}

/// A path is local when it, or any of its ancestors, is an existing
/// directory. A file that does not exist yet is still local as long as
/// its parent chain resolves.
pub fn is_local_path(path: &str) -> bool {
    let path = Path::new(path.trim());
    if path.as_os_str().is_empty() {
        return false;
    }
    // A bare name lives in the working directory.
    if path.parent().is_some_and(|p| p.as_os_str().is_empty()) {
        return Path::new(".").is_dir();
    }
    path.ancestors()
        .take_while(|p| !p.as_os_str().is_empty())
        .any(Path::is_dir)
}

/// Determine which backend claims `raw`.
pub fn classify(raw: &str) -> StorageResult<BackendKind> {
    classify_formatted(&format_path(raw))
}

fn classify_formatted(path: &str) -> StorageResult<BackendKind> {
    if let Some(kind) = BackendKind::REMOTE
        .into_iter()
        .find(|k| path.starts_with(k.prefix()))
    {
        return Ok(kind);
    }
    if is_local_path(path) {
        return Ok(BackendKind::Local);
    }
    Err(StorageError::UnrecognizedPath {
        path: path.to_string(),
        prefixes: BackendKind::remote_prefixes(),
    })
}

/// Bucket and key of a flat object-store path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKey {
    pub bucket: String,
    pub key: String,
    /// No key segment at all: the path names the bucket itself.
    pub whole_bucket: bool,
}

/// A classified, canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    kind: BackendKind,
    /// Scheme-less remainder, one trailing slash removed.
    body: String,
    trailing_slash: bool,
}

impl StoragePath {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let formatted = format_path(raw);
        let kind = classify_formatted(&formatted)?;
        let rest = &formatted[kind.prefix().len()..];

        let (body, trailing_slash) = match rest.strip_suffix('/') {
            // The filesystem root keeps its only slash.
            Some("") if kind == BackendKind::Local => (rest.to_string(), false),
            Some(stripped) => (stripped.to_string(), true),
            None => (rest.to_string(), false),
        };

        Ok(Self {
            kind,
            body,
            trailing_slash,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// The path without its scheme prefix.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether the caller wrote a trailing slash. Informational only.
    pub fn trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    /// Split a flat-store path on the first `/` after the scheme.
    pub fn bucket_key(&self) -> StorageResult<BucketKey> {
        let (bucket, key) = match self.body.split_once('/') {
            Some((bucket, key)) => (bucket, key),
            None => (self.body.as_str(), ""),
        };
        if bucket.is_empty() {
            return Err(StorageError::MissingBucket(self.to_string()));
        }
        Ok(BucketKey {
            bucket: bucket.to_string(),
            key: key.to_string(),
            whole_bucket: key.is_empty(),
        })
    }

    /// Dropbox paths are rooted at `/`; the app root itself is `""`.
    pub fn dropbox_path(&self) -> String {
        match self.body.as_str() {
            "" | "." | "/" => String::new(),
            body if body.starts_with('/') => body.to_string(),
            body => format!("/{}", body),
        }
    }

    pub fn local_path(&self) -> PathBuf {
        PathBuf::from(&self.body)
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.body)
    }
}

/// Join a root path and a relative listing entry with exactly one `/`.
pub fn join_path(root: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    match root.strip_suffix('/') {
        // A bare scheme (`dbx://`) or the filesystem root already ends the prefix.
        Some(_) if root.ends_with("://") || root == "/" => format!("{}{}", root, relative),
        Some(stripped) => format!("{}/{}", stripped, relative),
        None => format!("{}/{}", root, relative),
    }
}
