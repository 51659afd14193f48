//! One interface over local files, S3, Google Cloud Storage and Dropbox.
//!
//! ```no_run
//! use cloudio::{CloudConfig, CloudInterface};
//!
//! # fn main() -> cloudio::StorageResult<()> {
//! let ci = CloudInterface::new(CloudConfig::default())?;
//! ci.save("s3://bucket/reports/today.txt", "hello")?;
//! for entry in ci.listdir("s3://bucket/reports", false, false)? {
//!     println!("{}", entry);
//! }
//! ci.copy("s3://bucket/reports/today.txt", "dbx://archive/today.txt")?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod batch;
pub mod cache;
pub mod config;
pub mod file;
pub mod interface;

pub use backend::{PathStatus, StorageBackend};
pub use batch::{BatchOptions, BatchReport, CopyFailure, WorkerPool};
pub use cache::ListingCache;
pub use config::CloudConfig;
pub use file::{Access, CloudFile, OpenMode};
pub use interface::CloudInterface;

pub use cloudio_common::{
    BackendKind, InMemoryClient, Metadata, ObjectClient, StorageError, StoragePath, StorageResult,
};
