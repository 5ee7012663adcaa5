// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Deletion bitmaps of micro-partitions.
//!
//! A visimap file is the raw bit array of its micro-partition, bit `i` set
//! when row `i` is deleted.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::file::{FileSystem, FileSystemOptions, OpenFlags};
use super::{Bitmap8, StorageResult, TracedStorageError, DEFAULT_VISIMAP_CACHE_CAPACITY};
use crate::types::PAX_MAX_TUPLES_PER_FILE;

/// A least-recently-used cache that loads missing entries on demand.
pub struct LruCache<K: Hash + Eq, V: Clone> {
    inner: lru::LruCache<K, V>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: lru::LruCache::new(capacity),
        }
    }

    /// Return the entry of `key`, calling `load` on a miss. A hit makes the
    /// entry the most recently used; an insert past capacity evicts the least
    /// recently used one. A failed load caches nothing.
    pub fn get(
        &mut self,
        key: &K,
        load: impl FnOnce(&K) -> StorageResult<V>,
    ) -> StorageResult<V> {
        if let Some(value) = self.inner.get(key) {
            return Ok(value.clone());
        }
        let value = load(key)?;
        self.inner.put(key.clone(), value.clone());
        Ok(value)
    }

    /// Whether `key` is cached, without touching its recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

/// Largest accepted visimap file.
pub const MAX_VISIMAP_SIZE: usize = PAX_MAX_TUPLES_PER_FILE / 8;

/// Read a visimap file.
pub fn read_visimap(
    fs: &dyn FileSystem,
    path: &Path,
    options: Option<&FileSystemOptions>,
) -> StorageResult<Bitmap8> {
    let mut file = fs.open(path, OpenFlags::READ, options)?;
    let length = file.file_length()? as usize;
    if length > MAX_VISIMAP_SIZE {
        return Err(TracedStorageError::logic(format!(
            "visimap {:?} of {} bytes exceeds {} bytes",
            path, length, MAX_VISIMAP_SIZE
        )));
    }
    let mut bytes = vec![0u8; length];
    file.pread_n(&mut bytes, 0)?;
    file.close()?;
    Ok(Bitmap8::from_bytes(&bytes))
}

/// Write `bitmap` as a new visimap file.
pub fn write_visimap(
    fs: &dyn FileSystem,
    path: &Path,
    bitmap: &Bitmap8,
    options: Option<&FileSystemOptions>,
) -> StorageResult<()> {
    let bytes = bitmap.to_bytes(bitmap.len());
    if bytes.len() > MAX_VISIMAP_SIZE {
        return Err(TracedStorageError::logic(format!(
            "visimap of {} bits exceeds {} bytes",
            bitmap.len(),
            MAX_VISIMAP_SIZE
        )));
    }
    let mut file = fs.open(path, OpenFlags::WRITE_NEW, options)?;
    file.write_n(&bytes)?;
    file.flush()?;
    file.close()
}

/// Cache of loaded visimaps, shared by every scan of a session.
pub struct VisimapCache {
    fs: Arc<dyn FileSystem>,
    fs_options: Option<FileSystemOptions>,
    cache: Mutex<LruCache<PathBuf, Arc<Bitmap8>>>,
}

impl VisimapCache {
    pub fn new(fs: Arc<dyn FileSystem>, capacity: usize) -> Self {
        Self {
            fs,
            fs_options: None,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_default_capacity(fs: Arc<dyn FileSystem>) -> Self {
        Self::new(fs, DEFAULT_VISIMAP_CACHE_CAPACITY)
    }

    pub fn with_fs_options(mut self, options: Option<FileSystemOptions>) -> Self {
        self.fs_options = options;
        self
    }

    /// Load the visimap at `path`, from the cache when possible.
    pub fn load_visimap(&self, path: &Path) -> StorageResult<Arc<Bitmap8>> {
        self.cache.lock().get(&path.to_path_buf(), |path| {
            debug!("load visimap {:?}", path);
            read_visimap(self.fs.as_ref(), path, self.fs_options.as_ref()).map(Arc::new)
        })
    }

    /// Whether row `offset` of the micro-partition owning visimap `name` in
    /// relation directory `relation` is visible.
    pub fn test_visimap(&self, relation: &Path, name: &str, offset: usize) -> StorageResult<bool> {
        let bitmap = self.load_visimap(&relation.join(name))?;
        Ok(!bitmap.test(offset))
    }

    /// Drop a cached entry, e.g. after its file was replaced.
    pub fn invalidate(&self, path: &Path) {
        self.cache.lock().remove(&path.to_path_buf());
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::LocalFileSystem;
    use crate::storage::ErrorKind;

    #[test]
    fn lru_eviction() {
        let mut cache = LruCache::new(DEFAULT_VISIMAP_CACHE_CAPACITY);
        let mut loads = 0;
        for key in 0..DEFAULT_VISIMAP_CACHE_CAPACITY + 3 {
            cache
                .get(&key, |k| {
                    loads += 1;
                    Ok(*k * 10)
                })
                .unwrap();
        }
        assert_eq!(cache.len(), DEFAULT_VISIMAP_CACHE_CAPACITY);
        for evicted in 0..3 {
            assert!(!cache.contains(&evicted));
        }

        // a hit promotes the entry
        assert_eq!(cache.get(&3, |_| unreachable!()).unwrap(), 30);
        cache.get(&100, |_| Ok(0)).unwrap();
        assert!(cache.contains(&3));
        assert!(!cache.contains(&4));
        assert_eq!(loads, DEFAULT_VISIMAP_CACHE_CAPACITY + 3);

        let err = cache
            .get(&200, |_| Err(TracedStorageError::logic("load failed")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert!(!cache.contains(&200));
    }

    #[test]
    fn test_visimap_bits() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let mut bitmap = Bitmap8::new(20);
        bitmap.set(3);
        bitmap.set(17);
        write_visimap(fs.as_ref(), &dir.path().join("1_1.visimap"), &bitmap, None).unwrap();

        let cache = VisimapCache::new(fs, 2);
        assert!(cache.test_visimap(dir.path(), "1_1.visimap", 0).unwrap());
        assert!(!cache.test_visimap(dir.path(), "1_1.visimap", 3).unwrap());
        assert!(!cache.test_visimap(dir.path(), "1_1.visimap", 17).unwrap());
        // beyond the bitmap
        assert!(cache.test_visimap(dir.path(), "1_1.visimap", 1000).unwrap());
        assert_eq!(cache.len(), 1);
        assert!(cache.test_visimap(dir.path(), "missing", 0).is_err());
    }

    #[test]
    fn oversized_visimap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        std::fs::write(&path, vec![0u8; MAX_VISIMAP_SIZE + 1]).unwrap();
        let cache = VisimapCache::new(Arc::new(LocalFileSystem::new()), 2);
        assert_eq!(cache.load_visimap(&path).unwrap_err().kind(), ErrorKind::Logic);
        assert!(cache.is_empty());
    }
}
