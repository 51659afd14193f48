//! In-memory object store.
//!
//! Behaves like a flat object store: keys are opaque strings, listing is
//! by string prefix and comes back in lexicographic order. Clones share
//! the same objects.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::client::{Metadata, ObjectClient};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: Metadata,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryClient {
    objects: Arc<Mutex<BTreeMap<(String, String), StoredObject>>>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed objects, e.g. for tests.
    pub fn with_objects<'a, I>(bucket: &str, objects: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let client = Self::new();
        {
            let mut map = client.lock();
            for (key, data) in objects {
                map.insert(
                    (bucket.to_string(), key.to_string()),
                    StoredObject {
                        data: Bytes::copy_from_slice(data),
                        metadata: Metadata::new(),
                    },
                );
            }
        }
        client
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn metadata(&self, bucket: &str, key: &str) -> Option<Metadata> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(String, String), StoredObject>> {
        // A poisoned map is still consistent: every mutation is a single insert or remove.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectClient for InMemoryClient {
    async fn list(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<String>> {
        let map = self.lock();
        let keys = map
            .range((bucket.to_string(), prefix.to_string())..)
            .take_while(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), _)| k.clone())
            .collect();
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<Bytes> {
        match self.lock().get(&(bucket.to_string(), key.to_string())) {
            Some(object) => Ok(object.data.clone()),
            None => bail!("No such key: {}/{}", bucket, key),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        metadata: &Metadata,
    ) -> anyhow::Result<()> {
        self.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        debug!(bucket = %bucket, key = %key, "In-memory put complete");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.lock().remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
