// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::file::{FileSystem, FileSystemOptions, OpenFlags};
use crate::storage::proto::MicroPartitionStatisticsInfo;
use crate::storage::{
    statistics_info_combine, FilterLevel, MicroPartitionMetadata, PaxFilter, StorageResult,
    TracedStorageError, WriteSummaryCallback,
};
use crate::types::{TupleDesc, PAX_MAX_BLOCK_ID};

/// Source of the micro-partitions of a relation.
pub trait MicroPartitionIterator: Send {
    fn next(&mut self) -> Option<MicroPartitionMetadata>;

    /// Start over from the first micro-partition.
    fn rewind(&mut self);
}

/// Iterates over a snapshot of metadata.
#[derive(Debug, Clone, Default)]
pub struct VecMicroPartitionIterator {
    partitions: Vec<MicroPartitionMetadata>,
    position: usize,
}

impl VecMicroPartitionIterator {
    pub fn new(partitions: Vec<MicroPartitionMetadata>) -> Self {
        Self {
            partitions,
            position: 0,
        }
    }
}

impl MicroPartitionIterator for VecMicroPartitionIterator {
    fn next(&mut self) -> Option<MicroPartitionMetadata> {
        let item = self.partitions.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        item
    }

    fn rewind(&mut self) {
        self.position = 0;
    }
}

/// Iterates over the micro-partitions of a catalog. Rewinding takes a new
/// snapshot, so deletes and new files become visible on a rescan.
pub struct CatalogIterator {
    catalog: SharedCatalog,
    snapshot: VecMicroPartitionIterator,
}

impl CatalogIterator {
    pub fn new(catalog: SharedCatalog) -> Self {
        let snapshot = catalog.lock().iter();
        Self { catalog, snapshot }
    }
}

impl MicroPartitionIterator for CatalogIterator {
    fn next(&mut self) -> Option<MicroPartitionMetadata> {
        self.snapshot.next()
    }

    fn rewind(&mut self) {
        self.snapshot = self.catalog.lock().iter();
    }
}

/// Decides whether a micro-partition is visible to the current snapshot.
pub trait VisibilityOracle: Send + Sync {
    fn is_micro_partition_visible(&self, block_id: u32) -> bool;
}

/// Skips micro-partitions that are invisible or whose statistics prove that
/// no row matches the filter.
pub struct FilterIterator {
    inner: Box<dyn MicroPartitionIterator>,
    desc: Arc<TupleDesc>,
    filter: Option<Arc<PaxFilter>>,
    oracle: Option<Arc<dyn VisibilityOracle>>,
}

impl FilterIterator {
    pub fn new(inner: Box<dyn MicroPartitionIterator>, desc: Arc<TupleDesc>) -> Self {
        Self {
            inner,
            desc,
            filter: None,
            oracle: None,
        }
    }

    pub fn with_filter(mut self, filter: Arc<PaxFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn VisibilityOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    fn accept(&self, meta: &MicroPartitionMetadata) -> bool {
        if let Some(oracle) = &self.oracle {
            if !oracle.is_micro_partition_visible(meta.micro_partition_id) {
                return false;
            }
        }
        match (&self.filter, &meta.stats) {
            (Some(filter), Some(stats)) if filter.has_scan_keys() => {
                let keep = filter.test_scan(stats, &self.desc, FilterLevel::File);
                if !keep {
                    debug!("skip micro partition {}", meta.micro_partition_id);
                }
                keep
            }
            _ => true,
        }
    }
}

impl MicroPartitionIterator for FilterIterator {
    fn next(&mut self) -> Option<MicroPartitionMetadata> {
        while let Some(meta) = self.inner.next() {
            if self.accept(&meta) {
                return Some(meta);
            }
        }
        None
    }

    fn rewind(&mut self) {
        self.inner.rewind();
    }
}

/// Hands out block ids of new micro-partitions.
#[derive(Debug)]
pub struct BlockIdAllocator {
    next: AtomicU32,
}

impl BlockIdAllocator {
    pub fn new(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }

    pub fn allocate(&self) -> StorageResult<u32> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id > PAX_MAX_BLOCK_ID {
            return Err(TracedStorageError::logic(format!(
                "block id {} does not fit into a row pointer",
                id
            )));
        }
        Ok(id)
    }
}

pub const CATALOG_FILE_NAME: &str = "catalog.json";

#[derive(Serialize, Deserialize, Default)]
struct CatalogFile {
    partitions: Vec<MicroPartitionMetadata>,
}

/// A catalog shared by the writers of a relation.
pub type SharedCatalog = Arc<Mutex<JsonCatalog>>;

/// Micro-partitions of one relation, persisted as a JSON file inside the
/// relation directory.
pub struct JsonCatalog {
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    fs_options: Option<FileSystemOptions>,
    partitions: BTreeMap<u32, MicroPartitionMetadata>,
}

impl JsonCatalog {
    /// Load the catalog of `dir`, or start an empty one.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        dir: impl Into<PathBuf>,
        fs_options: Option<FileSystemOptions>,
    ) -> StorageResult<Self> {
        let dir = dir.into();
        let path = dir.join(CATALOG_FILE_NAME);
        let mut partitions = BTreeMap::new();
        if fs.exists(&path, fs_options.as_ref())? {
            let mut file = fs.open(&path, OpenFlags::READ, fs_options.as_ref())?;
            let mut data = vec![0; file.file_length()? as usize];
            file.pread_n(&mut data, 0)?;
            file.close()?;
            let content: CatalogFile = serde_json::from_slice(&data)?;
            for meta in content.partitions {
                partitions.insert(meta.micro_partition_id, meta);
            }
            debug!("load catalog {:?}: {} micro partitions", path, partitions.len());
        }
        Ok(Self {
            dir,
            fs,
            fs_options,
            partitions,
        })
    }

    pub fn into_shared(self) -> SharedCatalog {
        Arc::new(Mutex::new(self))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the catalog.
    pub fn save(&self) -> StorageResult<()> {
        let path = self.dir.join(CATALOG_FILE_NAME);
        let content = CatalogFile {
            partitions: self.partitions.values().cloned().collect(),
        };
        let json = serde_json::to_vec(&content)?;
        if self.fs.exists(&path, self.fs_options.as_ref())? {
            self.fs.delete(&path, self.fs_options.as_ref())?;
        }
        let mut file = self
            .fs
            .open(&path, OpenFlags::WRITE_NEW, self.fs_options.as_ref())?;
        file.write_n(&json)?;
        file.flush()?;
        file.close()
    }

    /// Add or replace the entry of a micro-partition.
    pub fn add(&mut self, meta: MicroPartitionMetadata) {
        self.partitions.insert(meta.micro_partition_id, meta);
    }

    pub fn remove(&mut self, block_id: u32) -> Option<MicroPartitionMetadata> {
        self.partitions.remove(&block_id)
    }

    pub fn get(&self, block_id: u32) -> Option<&MicroPartitionMetadata> {
        self.partitions.get(&block_id)
    }

    pub fn get_mut(&mut self, block_id: u32) -> StorageResult<&mut MicroPartitionMetadata> {
        self.partitions
            .get_mut(&block_id)
            .ok_or_else(|| TracedStorageError::not_found("micro partition", block_id))
    }

    pub fn partitions(&self) -> impl Iterator<Item = &MicroPartitionMetadata> {
        self.partitions.values()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Smallest block id above every registered micro-partition.
    pub fn next_block_id(&self) -> u32 {
        self.partitions
            .keys()
            .next_back()
            .map_or(0, |id| id.saturating_add(1))
    }

    pub fn block_id_allocator(&self) -> Arc<BlockIdAllocator> {
        Arc::new(BlockIdAllocator::new(self.next_block_id()))
    }

    /// Snapshot of the micro-partitions in block id order.
    pub fn iter(&self) -> VecMicroPartitionIterator {
        VecMicroPartitionIterator::new(self.partitions.values().cloned().collect())
    }

    /// Statistics of the whole relation, `None` when some micro-partition has
    /// no statistics or they cannot be combined.
    pub fn combined_stats(
        &self,
        desc: &TupleDesc,
    ) -> StorageResult<Option<MicroPartitionStatisticsInfo>> {
        let mut combined: Option<MicroPartitionStatisticsInfo> = None;
        for meta in self.partitions.values() {
            let Some(stats) = &meta.stats else {
                return Ok(None);
            };
            match &mut combined {
                None => combined = Some(stats.clone()),
                Some(dst) => {
                    if !statistics_info_combine(dst, stats, desc)? {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(combined)
    }
}

/// A summary callback registering every closed micro-partition in `catalog`.
pub fn register_in_catalog(catalog: SharedCatalog) -> WriteSummaryCallback {
    Box::new(move |summary| {
        catalog
            .lock()
            .add(MicroPartitionMetadata::from_summary(&summary));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::LocalFileSystem;
    use crate::storage::{
        ColumnStatsProvider, ErrorKind, MicroPartitionStats, ScanKey, ScanStrategy, WriteSummary,
    };
    use crate::types::{ColumnDesc, DataTypeKind, DataValue};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![ColumnDesc::new("a", DataTypeKind::Int64)]))
    }

    fn meta(block_id: u32, range: std::ops::Range<i64>) -> MicroPartitionMetadata {
        let mut stats = MicroPartitionStats::new(desc());
        for i in range.clone() {
            stats.add_row(&[DataValue::Int64(i)]).unwrap();
        }
        MicroPartitionMetadata::from_summary(&WriteSummary {
            file_name: PathBuf::from(block_id.to_string()),
            block_id,
            num_tuples: (range.end - range.start) as u64,
            file_size: 100,
            stats: stats.serialize().unwrap(),
        })
    }

    #[test]
    fn catalog_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let mut catalog = JsonCatalog::open(fs.clone(), dir.path(), None).unwrap();
        assert!(catalog.is_empty());
        assert_eq!(catalog.next_block_id(), 0);
        catalog.add(meta(3, 0..10));
        catalog.add(meta(1, 10..20));
        catalog.save().unwrap();
        // saving twice replaces the file
        catalog.save().unwrap();

        let mut catalog = JsonCatalog::open(fs, dir.path(), None).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.next_block_id(), 4);
        assert_eq!(catalog.get(1), Some(&meta(1, 10..20)));
        let ids: Vec<_> = catalog.partitions().map(|m| m.micro_partition_id).collect();
        assert_eq!(ids, vec![1, 3]);

        let stats = catalog.combined_stats(&desc()).unwrap().unwrap();
        assert_eq!(
            stats.min_max(0, DataTypeKind::Int64).unwrap(),
            Some((DataValue::Int64(0), DataValue::Int64(19)))
        );

        assert!(catalog.remove(3).is_some());
        assert_eq!(catalog.get_mut(3).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn filter_iterator() {
        struct HideOdd;
        impl VisibilityOracle for HideOdd {
            fn is_micro_partition_visible(&self, block_id: u32) -> bool {
                block_id % 2 == 0
            }
        }

        let partitions = vec![meta(0, 0..10), meta(1, 10..20), meta(2, 20..30), meta(4, 40..50)];
        let filter = Arc::new(
            PaxFilter::new().with_scan_keys(vec![ScanKey::new(0, ScanStrategy::Less, 30i64)]),
        );
        let mut iter = FilterIterator::new(Box::new(VecMicroPartitionIterator::new(partitions)), desc())
            .with_filter(filter.clone())
            .with_oracle(Arc::new(HideOdd));
        let mut ids = vec![];
        while let Some(meta) = iter.next() {
            ids.push(meta.micro_partition_id);
        }
        assert_eq!(ids, vec![0, 2]);
        iter.rewind();
        assert_eq!(iter.next().map(|m| m.micro_partition_id), Some(0));
        assert_eq!(
            filter.statistics().files_skipped.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn block_ids() {
        let allocator = BlockIdAllocator::new(PAX_MAX_BLOCK_ID);
        assert_eq!(allocator.allocate().unwrap(), PAX_MAX_BLOCK_ID);
        assert_eq!(allocator.allocate().unwrap_err().kind(), ErrorKind::Logic);
    }
}
