use thiserror::Error;

/// Errors surfaced by every cloudio operation.
///
/// Variants carry the offending path so routing mistakes can be traced
/// without access to internals.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("`{path}` is invalid: use one of {} or an existing local path", prefixes.join(", "))]
    UnrecognizedPath {
        path: String,
        prefixes: Vec<&'static str>,
    },

    #[error("No bucket name in path: {0}")]
    MissingBucket(String),

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Case-insensitivity conflict: `{requested}` is the same object as `{existing}`")]
    CaseConflict { requested: String, existing: String },

    #[error("Invalid mode '{mode}': {reason}")]
    InvalidMode { mode: String, reason: String },

    #[error("Content of {path} cannot be decoded as {encoding}; open it in binary mode ('b') to get the raw bytes")]
    Decode { path: String, encoding: &'static str },

    #[error("Missing credentials for {backend}: {hint}")]
    MissingCredentials { backend: &'static str, hint: String },

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Unsupported backend: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    pub fn invalid_mode(mode: &str, reason: impl Into<String>) -> Self {
        StorageError::InvalidMode {
            mode: mode.to_string(),
            reason: reason.into(),
        }
    }

    /// True for `NotFound`, including IO errors of kind `NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
