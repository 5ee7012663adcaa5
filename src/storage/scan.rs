// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Scan descriptors: sequential, bitmap, analyze and sample access paths
//! over a relation.
//!
//! ```plain
//! begin_scan -> { get_next_slot* | bitmap_next_block/tuple* |
//!                 scan_analyze_next_block/tuple* | scan_sample_next_block/tuple* } -> end_scan
//! ```

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::file::FileSystem;
use super::orc::OrcReader;
use super::table::{
    open_micro_partition, CatalogIterator, FilterIterator, MicroPartitionIterator, SharedCatalog, TableReader,
    TableReaderOptions, VisibilityOracle,
};
use super::visimap::VisimapCache;
use super::{
    DataBuffer, MicroPartitionReader, PaxFilter, ScanKey, SharedBuffer, StorageOptions,
    StorageResult, TracedStorageError,
};
use crate::types::{ItemPointer, TupleDesc, TupleSlot, PAX_MAX_OFFSET};

/// Page size the planner counts relation sizes in.
pub const PAX_PAGE_SIZE: u64 = 8192;

/// Planner estimate of a relation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelSizeEstimate {
    pub pages: u32,
    pub tuples: f64,
    /// Index-only scans are not supported, so always zero.
    pub all_visible_fraction: f64,
}

/// Sum up the sizes recorded in the catalog. Even an empty relation takes
/// one page.
pub fn estimate_rel_size(iter: &mut dyn MicroPartitionIterator) -> RelSizeEstimate {
    iter.rewind();
    let (mut tuples, mut size) = (0u64, 0u64);
    while let Some(meta) = iter.next() {
        tuples += meta.tuple_count;
        size += meta.file_size;
    }
    iter.rewind();
    let pages = size.div_ceil(PAX_PAGE_SIZE).clamp(1, u32::MAX as u64) as u32;
    RelSizeEstimate {
        pages,
        tuples: tuples as f64,
        all_visible_fraction: 0.0,
    }
}

/// Memory owned by one scan. Every decode buffer of the scan is carved out of
/// it, and all of it is released when the scan ends.
#[derive(Debug, Default)]
pub struct ScanArena {
    buffer: SharedBuffer,
}

impl ScanArena {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(DataBuffer::new(0))),
        }
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }

    /// Bytes currently held.
    pub fn reserved(&self) -> usize {
        self.buffer.lock().capacity()
    }

    /// Release the memory, keeping the arena usable.
    pub fn reset(&self) -> StorageResult<()> {
        let mut buffer = self.buffer.lock();
        buffer.clear();
        buffer.resize(0)
    }
}

/// A relation as seen by its scans.
#[derive(Clone)]
pub struct ScanRelation {
    pub options: StorageOptions,
    pub desc: Arc<TupleDesc>,
    pub fs: Arc<dyn FileSystem>,
    pub catalog: SharedCatalog,
    /// Shared by every scan of the session.
    pub visimap_cache: Arc<VisimapCache>,
    pub oracle: Option<Arc<dyn VisibilityOracle>>,
}

impl ScanRelation {
    pub fn new(
        options: StorageOptions,
        desc: Arc<TupleDesc>,
        fs: Arc<dyn FileSystem>,
        catalog: SharedCatalog,
    ) -> Self {
        let visimap_cache = Arc::new(
            VisimapCache::new(fs.clone(), options.visimap_cache_capacity)
                .with_fs_options(options.fs_options.clone()),
        );
        Self {
            options,
            desc,
            fs,
            catalog,
            visimap_cache,
            oracle: None,
        }
    }

    pub fn with_visimap_cache(mut self, cache: Arc<VisimapCache>) -> Self {
        self.visimap_cache = cache;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn VisibilityOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    fn reader_options(
        &self,
        filter: Option<Arc<PaxFilter>>,
        buffer: Option<SharedBuffer>,
    ) -> TableReaderOptions {
        TableReaderOptions {
            path: self.options.path.clone(),
            fs_options: self.options.fs_options.clone(),
            filter,
            reused_buffer: buffer,
            target_desc: Some(self.desc.clone()),
            visimap_cache: Some(self.visimap_cache.clone()),
        }
    }

    fn is_visible(&self, block_id: u32) -> bool {
        self.oracle
            .as_ref()
            .map_or(true, |o| o.is_micro_partition_visible(block_id))
    }
}

/// Picks the blocks and tuples of a sample scan.
pub trait BlockSampler {
    /// Next block to sample out of `nblocks`, `None` when the scan is done.
    fn next_block(&mut self, nblocks: u32) -> Option<u32>;

    /// Next offset below `max_offset` to sample in `block`, `None` when the
    /// block is done.
    fn next_tuple(&mut self, block: u32, max_offset: u32) -> Option<u32>;
}

fn check_percent(percent: f64) -> StorageResult<f64> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(TracedStorageError::invalid(format!(
            "sample percentage {} is not between 0 and 100",
            percent
        )));
    }
    Ok(percent / 100.0)
}

/// Visits every block and keeps each tuple with a fixed probability.
pub struct BernoulliSampler {
    probability: f64,
    rng: StdRng,
    next_block: u32,
    next_offset: u32,
}

impl BernoulliSampler {
    pub fn new(percent: f64, seed: u64) -> StorageResult<Self> {
        Ok(Self {
            probability: check_percent(percent)?,
            rng: StdRng::seed_from_u64(seed),
            next_block: 0,
            next_offset: 0,
        })
    }
}

impl BlockSampler for BernoulliSampler {
    fn next_block(&mut self, nblocks: u32) -> Option<u32> {
        if self.next_block >= nblocks {
            return None;
        }
        self.next_block += 1;
        self.next_offset = 0;
        Some(self.next_block - 1)
    }

    fn next_tuple(&mut self, _block: u32, max_offset: u32) -> Option<u32> {
        while self.next_offset < max_offset {
            let offset = self.next_offset;
            self.next_offset += 1;
            if self.rng.gen::<f64>() < self.probability {
                return Some(offset);
            }
        }
        None
    }
}

/// Keeps whole blocks with a fixed probability.
pub struct SystemSampler {
    probability: f64,
    rng: StdRng,
    next_block: u32,
    next_offset: u32,
}

impl SystemSampler {
    pub fn new(percent: f64, seed: u64) -> StorageResult<Self> {
        Ok(Self {
            probability: check_percent(percent)?,
            rng: StdRng::seed_from_u64(seed),
            next_block: 0,
            next_offset: 0,
        })
    }
}

impl BlockSampler for SystemSampler {
    fn next_block(&mut self, nblocks: u32) -> Option<u32> {
        while self.next_block < nblocks {
            let block = self.next_block;
            self.next_block += 1;
            if self.rng.gen::<f64>() < self.probability {
                self.next_offset = 0;
                return Some(block);
            }
        }
        None
    }

    fn next_tuple(&mut self, _block: u32, max_offset: u32) -> Option<u32> {
        if self.next_offset >= max_offset {
            return None;
        }
        self.next_offset += 1;
        Some(self.next_offset - 1)
    }
}

/// Fetches single tuples by row pointer, opening one micro-partition at a
/// time.
pub struct PaxIndexScanDesc {
    relation: ScanRelation,
    buffer: Option<SharedBuffer>,
    block_id: Option<u32>,
    reader: Option<OrcReader>,
}

impl PaxIndexScanDesc {
    pub fn new(relation: ScanRelation) -> Self {
        Self {
            relation,
            buffer: None,
            block_id: None,
            reader: None,
        }
    }

    pub fn with_buffer(mut self, buffer: SharedBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Open micro-partition `block_id`, `false` when it does not exist or is
    /// not visible.
    pub fn open_block(&mut self, block_id: u32) -> StorageResult<bool> {
        if self.block_id == Some(block_id) {
            return Ok(self.reader.is_some());
        }
        self.close()?;
        self.block_id = Some(block_id);
        let meta = self.relation.catalog.lock().get(block_id).cloned();
        let Some(meta) = meta.filter(|_| self.relation.is_visible(block_id)) else {
            return Ok(false);
        };
        let options = self.relation.reader_options(None, self.buffer.clone());
        self.reader = Some(open_micro_partition(
            self.relation.fs.as_ref(),
            &options,
            &meta,
        )?);
        Ok(true)
    }

    /// Fetch the tuple at `tid`, `false` when it does not exist or is deleted.
    pub fn fetch_tuple(&mut self, tid: ItemPointer, slot: &mut TupleSlot) -> StorageResult<bool> {
        if !self.open_block(tid.block_id())? {
            return Ok(false);
        }
        match &mut self.reader {
            Some(reader) => reader.get_tuple(slot, tid.row_index() as usize),
            None => Ok(false),
        }
    }

    pub fn close(&mut self) -> StorageResult<()> {
        self.block_id = None;
        if let Some(mut reader) = self.reader.take() {
            reader.close()?;
        }
        Ok(())
    }
}

/// A scan over a relation.
pub struct PaxScanDesc {
    relation: ScanRelation,
    arena: ScanArena,
    filter: Arc<PaxFilter>,
    reader: TableReader,
    index_desc: Option<PaxIndexScanDesc>,
    /// Block number of the current bitmap block.
    bitmap_block: Option<u32>,

    rel_size: Option<RelSizeEstimate>,
    /// Reads every row regardless of the scan keys, for analyze and sample
    /// scans.
    sample_reader: Option<(TableReader, RelSizeEstimate)>,
    /// Remaining ordinals of the current analyze block.
    analyze_rows: Range<usize>,
    sample_block: Option<u32>,
}

impl PaxScanDesc {
    /// Begin a scan over every micro-partition of the catalog.
    ///
    /// Without a projection every column is read. Column 0 and the columns of
    /// the scan keys are always read.
    pub fn begin_scan(
        relation: ScanRelation,
        projection: Option<Vec<bool>>,
        scan_keys: Vec<ScanKey>,
    ) -> StorageResult<Self> {
        let iterator = Box::new(CatalogIterator::new(relation.catalog.clone()));
        Self::begin_scan_with_iterator(relation, iterator, projection, scan_keys)
    }

    pub fn begin_scan_with_iterator(
        relation: ScanRelation,
        iterator: Box<dyn MicroPartitionIterator>,
        projection: Option<Vec<bool>>,
        scan_keys: Vec<ScanKey>,
    ) -> StorageResult<Self> {
        let natts = relation.desc.natts();
        let mut projection = projection.unwrap_or_else(|| vec![true; natts]);
        projection.resize(natts, false);
        if let Some(first) = projection.first_mut() {
            *first = true;
        }
        let mut scan_keys = scan_keys;
        for key in &mut scan_keys {
            if key.column >= natts {
                return Err(TracedStorageError::invalid(format!(
                    "scan key on column {} of a relation of {} columns",
                    key.column, natts
                )));
            }
            let kind = relation.desc.column(key.column).kind;
            key.argument = key.argument.cast_to(kind).ok_or_else(|| {
                TracedStorageError::invalid(format!(
                    "argument of scan key {} does not fit column type {}",
                    key, kind
                ))
            })?;
            projection[key.column] = true;
        }
        let filter = Arc::new(
            PaxFilter::new()
                .with_projection(projection)
                .with_scan_keys(scan_keys),
        );

        let mut iterator =
            FilterIterator::new(iterator, relation.desc.clone()).with_filter(filter.clone());
        if let Some(oracle) = &relation.oracle {
            iterator = iterator.with_oracle(oracle.clone());
        }

        let arena = ScanArena::new();
        let options = relation.reader_options(Some(filter.clone()), Some(arena.buffer()));
        let mut reader = TableReader::new(Box::new(iterator), relation.fs.clone(), options);
        reader.open()?;
        debug!("begin scan of {:?}", relation.options.path);
        Ok(Self {
            relation,
            arena,
            filter,
            reader,
            index_desc: None,
            bitmap_block: None,
            rel_size: None,
            sample_reader: None,
            analyze_rows: 0..0,
            sample_block: None,
        })
    }

    pub fn filter(&self) -> &Arc<PaxFilter> {
        &self.filter
    }

    pub fn arena(&self) -> &ScanArena {
        &self.arena
    }

    /// Next tuple satisfying the scan keys, `false` at the end.
    pub fn get_next_slot(&mut self, slot: &mut TupleSlot) -> StorageResult<bool> {
        while self.reader.read_tuple(slot)? {
            if self.filter.test_row(&slot.values) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Restart the scan from the first micro-partition, picking up the
    /// current state of the catalog.
    pub fn rescan(&mut self) -> StorageResult<()> {
        if let Some((mut reader, _)) = self.sample_reader.take() {
            reader.close()?;
        }
        self.reader.reopen()
    }

    /// Move to the block of a bitmap heap scan. `block_number` is the block
    /// number of the row pointers, not a block id.
    pub fn bitmap_next_block(&mut self, block_number: u32) -> StorageResult<bool> {
        let index_desc = self.index_desc.get_or_insert_with(|| {
            PaxIndexScanDesc::new(self.relation.clone()).with_buffer(self.arena.buffer())
        });
        self.bitmap_block = Some(block_number);
        index_desc.open_block(ItemPointer::new(block_number, 0).block_id())
    }

    /// Fetch the tuple at `offset` of the current bitmap block.
    pub fn bitmap_next_tuple(&mut self, offset: u32, slot: &mut TupleSlot) -> StorageResult<bool> {
        if offset >= PAX_MAX_OFFSET {
            return Err(TracedStorageError::logic(format!(
                "tuple offset {:#x} exceeds {:#x}",
                offset, PAX_MAX_OFFSET
            )));
        }
        let (Some(block_number), Some(index_desc)) = (self.bitmap_block, &mut self.index_desc)
        else {
            return Err(TracedStorageError::logic(
                "bitmap_next_tuple called before bitmap_next_block",
            ));
        };
        index_desc.fetch_tuple(ItemPointer::new(block_number, offset as u16), slot)
    }

    /// Estimated size of the relation, computed once per scan.
    pub fn estimate_rel_size(&mut self) -> RelSizeEstimate {
        if let Some(size) = self.rel_size {
            return size;
        }
        let mut iter = self.relation.catalog.lock().iter();
        let size = estimate_rel_size(&mut iter);
        self.rel_size = Some(size);
        size
    }

    /// Open the unfiltered reader of analyze and sample scans. Virtual
    /// blocks are sized from the micro-partitions it visits.
    fn sample_reader(&mut self) -> StorageResult<(&mut TableReader, RelSizeEstimate)> {
        if self.sample_reader.is_none() {
            let mut iterator = FilterIterator::new(
                Box::new(CatalogIterator::new(self.relation.catalog.clone())),
                self.relation.desc.clone(),
            );
            if let Some(oracle) = &self.relation.oracle {
                iterator = iterator.with_oracle(oracle.clone());
            }
            let size = estimate_rel_size(&mut iterator);
            let options = self.relation.reader_options(None, Some(self.arena.buffer()));
            let mut reader = TableReader::new(Box::new(iterator), self.relation.fs.clone(), options);
            reader.open()?;
            self.sample_reader = Some((reader, size));
        }
        match &mut self.sample_reader {
            Some((reader, size)) => Ok((reader, *size)),
            None => Err(TracedStorageError::logic("sample reader is not open")),
        }
    }

    /// Tuples per virtual block of analyze and sample scans.
    fn tuples_per_block(size: &RelSizeEstimate) -> usize {
        ((size.tuples / size.pages as f64).ceil() as usize).max(1)
    }

    /// Prepare to analyze virtual block `block`, `false` past the end of the
    /// relation.
    pub fn scan_analyze_next_block(&mut self, block: u32) -> StorageResult<bool> {
        let (_, size) = self.sample_reader()?;
        let per_block = Self::tuples_per_block(&size);
        let total = size.tuples as usize;
        let start = (block as usize).saturating_mul(per_block).min(total);
        self.analyze_rows = start..(start + per_block).min(total);
        Ok(!self.analyze_rows.is_empty())
    }

    /// Next live tuple of the analyzed block. Deleted rows on the way are
    /// counted as dead.
    pub fn scan_analyze_next_tuple(
        &mut self,
        slot: &mut TupleSlot,
        live_rows: &mut f64,
        dead_rows: &mut f64,
    ) -> StorageResult<bool> {
        while let Some(ordinal) = self.analyze_rows.next() {
            let (reader, _) = self.sample_reader()?;
            if reader.get_tuple(slot, ordinal)? {
                *live_rows += 1.0;
                return Ok(true);
            }
            *dead_rows += 1.0;
        }
        Ok(false)
    }

    /// Ask `sampler` for the next block, `false` when the sample is complete.
    pub fn scan_sample_next_block(
        &mut self,
        sampler: &mut dyn BlockSampler,
    ) -> StorageResult<bool> {
        let (_, size) = self.sample_reader()?;
        let per_block = Self::tuples_per_block(&size);
        let nblocks = (size.tuples as usize).div_ceil(per_block) as u32;
        self.sample_block = sampler.next_block(nblocks);
        Ok(self.sample_block.is_some())
    }

    /// Next sampled tuple of the current block.
    pub fn scan_sample_next_tuple(
        &mut self,
        sampler: &mut dyn BlockSampler,
        slot: &mut TupleSlot,
    ) -> StorageResult<bool> {
        let Some(block) = self.sample_block else {
            return Ok(false);
        };
        let (reader, size) = self.sample_reader()?;
        let per_block = Self::tuples_per_block(&size);
        let total = size.tuples as usize;
        while let Some(offset) = sampler.next_tuple(block, per_block as u32) {
            let ordinal = block as usize * per_block + offset as usize;
            if ordinal >= total {
                continue;
            }
            if reader.get_tuple(slot, ordinal)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Close the scan and release its memory.
    pub fn end_scan(mut self) -> StorageResult<()> {
        self.reader.close()?;
        if let Some((reader, _)) = &mut self.sample_reader {
            reader.close()?;
        }
        if let Some(index_desc) = &mut self.index_desc {
            index_desc.close()?;
        }
        if self.relation.options.log_filter_stats {
            self.filter.log_statistics();
        }
        self.arena.reset()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::storage::file::LocalFileSystem;
    use crate::storage::table::{
        register_in_catalog, BlockIdAllocator, JsonCatalog, TableDeleter, TableWriter,
        VecMicroPartitionIterator,
    };
    use crate::storage::{ErrorKind, ScanStrategy};
    use crate::types::{ColumnDesc, DataTypeKind, DataValue};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![
            ColumnDesc::new("id", DataTypeKind::Int64),
            ColumnDesc::new("name", DataTypeKind::String),
            ColumnDesc::new("score", DataTypeKind::Float64),
        ]))
    }

    /// 300 rows in three micro-partitions of 100 rows.
    fn relation(dir: &Path) -> ScanRelation {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let catalog = JsonCatalog::open(fs.clone(), dir, None).unwrap().into_shared();
        let mut options = StorageOptions::default_for_test(dir.to_path_buf());
        options.split_tuple_numbers = 100;
        options.group_limit = 25;
        let mut writer = TableWriter::new(
            options.clone(),
            desc(),
            fs.clone(),
            Arc::new(BlockIdAllocator::new(0)),
        );
        writer.set_write_summary_callback(register_in_catalog(catalog.clone()));
        writer.open().unwrap();
        for i in 0..300i64 {
            let mut slot = TupleSlot::from_values(vec![
                DataValue::Int64(i),
                DataValue::from(format!("name-{i}")),
                DataValue::from(i as f64 / 2.0),
            ]);
            writer.write_tuple(&mut slot).unwrap();
        }
        writer.close().unwrap();
        ScanRelation::new(options, desc(), fs, catalog)
    }

    fn ids(scan: &mut PaxScanDesc) -> Vec<i64> {
        let mut slot = TupleSlot::default();
        let mut ids = vec![];
        while scan.get_next_slot(&mut slot).unwrap() {
            match slot.get(0) {
                DataValue::Int64(v) => ids.push(*v),
                other => panic!("unexpected {other}"),
            }
        }
        ids
    }

    #[test]
    fn sequential_scan_with_keys() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let keys = vec![
            ScanKey::new(0, ScanStrategy::GreaterEqual, 140i64),
            ScanKey::new(0, ScanStrategy::Less, 160i64),
        ];
        // project only the score, the id is added for the keys
        let mut scan =
            PaxScanDesc::begin_scan(rel.clone(), Some(vec![false, false, true]), keys).unwrap();
        let mut slot = TupleSlot::default();
        assert!(scan.get_next_slot(&mut slot).unwrap());
        assert_eq!(slot.get(0), &DataValue::Int64(140));
        assert!(slot.is_null(1));
        assert_eq!(slot.get(2), &DataValue::from(70.0));
        assert_eq!(ids(&mut scan), (141..160).collect::<Vec<_>>());

        let stats = scan.filter().statistics();
        assert_eq!(stats.files_skipped.load(Ordering::Relaxed), 2);
        // groups of 25 rows: only [125, 150) and [150, 175) can match
        assert_eq!(stats.groups_skipped.load(Ordering::Relaxed), 2);

        scan.rescan().unwrap();
        assert_eq!(ids(&mut scan).len(), 20);
        scan.end_scan().unwrap();
    }

    #[test]
    fn full_scan_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let mut scan = PaxScanDesc::begin_scan(rel.clone(), None, vec![]).unwrap();
        let mut slot = TupleSlot::default();
        assert!(scan.get_next_slot(&mut slot).unwrap());
        assert_eq!(slot.get(1), &DataValue::from("name-0"));
        assert_eq!(ids(&mut scan).len(), 299);
        assert!(scan.arena().reserved() > 0);
        scan.end_scan().unwrap();

        // an empty projection still reads column 0
        let mut scan = PaxScanDesc::begin_scan(rel.clone(), Some(vec![]), vec![]).unwrap();
        assert!(scan.get_next_slot(&mut slot).unwrap());
        assert_eq!(slot.get(0), &DataValue::Int64(0));
        assert!(slot.is_null(1) && slot.is_null(2));
        scan.end_scan().unwrap();

        let bad_key = vec![ScanKey::is_null(7)];
        assert_eq!(
            PaxScanDesc::begin_scan(rel, None, bad_key).err().map(|e| e.kind()),
            Some(ErrorKind::Invalid)
        );
    }

    #[test]
    fn scan_key_arguments_are_typed() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        // narrower integers compare by value
        let keys = vec![ScanKey::new(0, ScanStrategy::Less, 100i32)];
        let mut scan = PaxScanDesc::begin_scan(rel.clone(), None, keys).unwrap();
        assert_eq!(ids(&mut scan), (0..100).collect::<Vec<_>>());
        assert_eq!(
            scan.filter().statistics().files_skipped.load(Ordering::Relaxed),
            2
        );
        scan.end_scan().unwrap();

        let keys = vec![ScanKey::new(0, ScanStrategy::Equal, 299i16)];
        let mut scan = PaxScanDesc::begin_scan(rel.clone(), None, keys).unwrap();
        assert_eq!(ids(&mut scan), vec![299]);
        scan.end_scan().unwrap();

        for key in [
            ScanKey::new(0, ScanStrategy::Less, "100"),
            ScanKey::new(2, ScanStrategy::Greater, 1i64),
            ScanKey::new(1, ScanStrategy::Equal, 1.5),
        ] {
            assert_eq!(
                PaxScanDesc::begin_scan(rel.clone(), None, vec![key])
                    .err()
                    .map(|e| e.kind()),
                Some(ErrorKind::Invalid)
            );
        }
        // null tests take no argument
        let mut scan =
            PaxScanDesc::begin_scan(rel, None, vec![ScanKey::is_not_null(1)]).unwrap();
        assert_eq!(ids(&mut scan).len(), 300);
        scan.end_scan().unwrap();
    }

    #[test]
    fn bitmap_scan() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let mut scan = PaxScanDesc::begin_scan(rel, None, vec![]).unwrap();
        let mut slot = TupleSlot::default();
        assert_eq!(
            scan.bitmap_next_tuple(0, &mut slot).unwrap_err().kind(),
            ErrorKind::Logic
        );

        let tid = ItemPointer::from_pax(2, 42);
        assert!(scan.bitmap_next_block(tid.block_number).unwrap());
        assert!(scan.bitmap_next_tuple(tid.offset as u32, &mut slot).unwrap());
        assert_eq!(slot.get(0), &DataValue::Int64(242));
        assert_eq!(slot.tid, tid);
        assert!(!scan.bitmap_next_tuple(100, &mut slot).unwrap());
        assert_eq!(
            scan.bitmap_next_tuple(0x8000, &mut slot).unwrap_err().kind(),
            ErrorKind::Logic
        );

        // unknown block
        let tid = ItemPointer::from_pax(9, 0);
        assert!(!scan.bitmap_next_block(tid.block_number).unwrap());
        assert!(!scan.bitmap_next_tuple(0, &mut slot).unwrap());
        scan.end_scan().unwrap();
    }

    #[test]
    fn analyze_counts_dead_rows() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let mut deleter = TableDeleter::new(
            rel.options.clone(),
            rel.desc.clone(),
            rel.fs.clone(),
            rel.catalog.clone(),
            Arc::new(BlockIdAllocator::new(3)),
        );
        for row in 0..10 {
            deleter.mark_delete(ItemPointer::from_pax(1, row));
        }
        deleter.delete_with_visibility_map().unwrap();

        let mut scan = PaxScanDesc::begin_scan(rel, None, vec![]).unwrap();
        let size = scan.estimate_rel_size();
        assert_eq!(size.tuples, 300.0);
        assert!(size.pages >= 1);

        let (mut live, mut dead) = (0.0, 0.0);
        let mut slot = TupleSlot::default();
        let mut block = 0;
        while scan.scan_analyze_next_block(block).unwrap() {
            while scan
                .scan_analyze_next_tuple(&mut slot, &mut live, &mut dead)
                .unwrap()
            {}
            block += 1;
        }
        assert_eq!(live, 290.0);
        assert_eq!(dead, 10.0);
        scan.end_scan().unwrap();
    }

    #[test]
    fn analyze_and_sample_ignore_scan_keys() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let keys = vec![ScanKey::new(0, ScanStrategy::GreaterEqual, 250i64)];
        let mut scan = PaxScanDesc::begin_scan(rel, None, keys).unwrap();

        let (mut live, mut dead) = (0.0, 0.0);
        let mut slot = TupleSlot::default();
        let mut seen = vec![];
        let mut block = 0;
        while scan.scan_analyze_next_block(block).unwrap() {
            while scan
                .scan_analyze_next_tuple(&mut slot, &mut live, &mut dead)
                .unwrap()
            {
                if let DataValue::Int64(id) = slot.get(0) {
                    seen.push(*id);
                }
            }
            block += 1;
        }
        assert_eq!((live, dead), (300.0, 0.0));
        assert_eq!(seen, (0..300).collect::<Vec<_>>());

        let mut sampler = SystemSampler::new(100.0, 3).unwrap();
        let mut sampled = 0;
        while scan.scan_sample_next_block(&mut sampler).unwrap() {
            while scan.scan_sample_next_tuple(&mut sampler, &mut slot).unwrap() {
                sampled += 1;
            }
        }
        assert_eq!(sampled, 300);

        // the sequential part of the scan still honors the keys
        assert_eq!(ids(&mut scan), (250..300).collect::<Vec<_>>());
        scan.end_scan().unwrap();
    }

    #[test]
    fn sample_scan() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let mut scan = PaxScanDesc::begin_scan(rel, None, vec![]).unwrap();

        fn sample(scan: &mut PaxScanDesc, sampler: &mut dyn BlockSampler) -> usize {
            let mut slot = TupleSlot::default();
            let mut count = 0;
            while scan.scan_sample_next_block(sampler).unwrap() {
                while scan.scan_sample_next_tuple(sampler, &mut slot).unwrap() {
                    count += 1;
                }
            }
            count
        }
        assert_eq!(sample(&mut scan, &mut BernoulliSampler::new(100.0, 1).unwrap()), 300);
        assert_eq!(sample(&mut scan, &mut BernoulliSampler::new(0.0, 1).unwrap()), 0);
        assert_eq!(sample(&mut scan, &mut SystemSampler::new(100.0, 7).unwrap()), 300);
        let some = sample(&mut scan, &mut BernoulliSampler::new(50.0, 42).unwrap());
        assert!(some > 0 && some < 300);
        assert!(BernoulliSampler::new(120.0, 0).is_err());
        scan.end_scan().unwrap();
    }

    #[test]
    fn estimate_empty_relation() {
        let size = estimate_rel_size(&mut VecMicroPartitionIterator::default());
        assert_eq!(
            size,
            RelSizeEstimate {
                pages: 1,
                tuples: 0.0,
                all_visible_fraction: 0.0
            }
        );
    }
}
