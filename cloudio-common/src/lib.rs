//! Backend-independent core of cloudio.
//!
//! Path classification and canonicalization, folder emulation over flat
//! key spaces, the shared error type, and the object-client trait that
//! flat object stores implement.

pub mod client;
pub mod error;
pub mod keyspace;
pub mod memory;
pub mod path;

pub use client::{Metadata, ObjectClient};
pub use error::{StorageError, StorageResult};
pub use keyspace::KeySpace;
pub use memory::InMemoryClient;
pub use path::{classify, BackendKind, BucketKey, StoragePath};
