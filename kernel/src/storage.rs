//! The storage abstraction the commit protocol runs against.
//!
//! Backends are external collaborators (object stores, filesystems, test
//! doubles); the kernel only depends on this trait. The two atomic
//! primitives are optional capabilities: a backend that lacks them still
//! satisfies the contract through the default fallback methods, at the cost
//! of the documented race windows (see [`StorageCapabilities`]).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{Error, IcebergResult};

/// Which atomic primitives a backend implements natively.
///
/// When `atomic_put_if_absent` is false the default `put_if_absent` degrades
/// to exists-then-put, leaving a window where two writers can both create
/// the same path. When `compare_and_swap` is false the default CAS degrades
/// to read-compare-put with the same caveat. The commit protocol works
/// either way; only the strength of its conflict detection changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCapabilities {
    pub atomic_put_if_absent: bool,
    pub compare_and_swap: bool,
}

/// An object-store-shaped backend: whole-object get/put plus listing.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the object at `path`, or `None` when absent.
    async fn get(&self, path: &str) -> IcebergResult<Option<Bytes>>;

    /// Writes (or overwrites) the object at `path`.
    async fn put(&self, path: &str, data: Bytes) -> IcebergResult<()>;

    /// Deletes the object at `path`. Deleting an absent object is not an
    /// error.
    async fn delete(&self, path: &str) -> IcebergResult<()>;

    /// Lists all object paths starting with `prefix`.
    async fn list(&self, prefix: &str) -> IcebergResult<Vec<String>>;

    async fn exists(&self, path: &str) -> IcebergResult<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Which of the optional primitives below are genuinely atomic here.
    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities::default()
    }

    /// Creates the object only if `path` is absent; returns whether this
    /// call created it. The default is the racy exists-then-put fallback.
    async fn put_if_absent(&self, path: &str, data: Bytes) -> IcebergResult<bool> {
        if self.exists(path).await? {
            return Ok(false);
        }
        self.put(path, data).await?;
        Ok(true)
    }

    /// Replaces the object only if its current content equals `expected`
    /// (`None` meaning "must be absent"); returns whether the swap happened.
    /// The default is the racy read-compare-put fallback.
    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<&Bytes>,
        new: Bytes,
    ) -> IcebergResult<bool> {
        let current = self.get(path).await?;
        if current.as_ref() != expected {
            return Ok(false);
        }
        self.put(path, new).await?;
        Ok(true)
    }
}

/// An in-process backend with genuinely atomic primitives. The reference
/// backend for tests and the simulation double for the commit protocol.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> IcebergResult<std::sync::MutexGuard<'_, HashMap<String, Bytes>>> {
        self.objects
            .lock()
            .map_err(|_| Error::storage("<memory>", "backend mutex poisoned"))
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, path: &str) -> IcebergResult<Option<Bytes>> {
        Ok(self.lock()?.get(path).cloned())
    }

    async fn put(&self, path: &str, data: Bytes) -> IcebergResult<()> {
        self.lock()?.insert(path.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> IcebergResult<()> {
        self.lock()?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> IcebergResult<Vec<String>> {
        let mut paths: Vec<String> = self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn capabilities(&self) -> StorageCapabilities {
        StorageCapabilities {
            atomic_put_if_absent: true,
            compare_and_swap: true,
        }
    }

    async fn put_if_absent(&self, path: &str, data: Bytes) -> IcebergResult<bool> {
        let mut objects = self.lock()?;
        if objects.contains_key(path) {
            return Ok(false);
        }
        objects.insert(path.to_string(), data);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<&Bytes>,
        new: Bytes,
    ) -> IcebergResult<bool> {
        let mut objects = self.lock()?;
        if objects.get(path) != expected {
            return Ok(false);
        }
        objects.insert(path.to_string(), new);
        Ok(true)
    }
}
