// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::ops::Range;
use std::sync::Arc;

use tracing::{info, warn};

use super::{BlockIdAllocator, DefaultSplitStrategy, FileSplitStrategy, WriterFactory};
use crate::storage::file::FileSystem;
use crate::storage::orc::OrcWriter;
use crate::storage::{
    ColumnEncodingOption, MicroPartitionWriter, StorageOptions, StorageResult, TracedStorageError,
    WriteSummaryCallback,
};
use crate::types::{DataValue, TupleDesc, TupleSlot};

/// Key range `[lower, upper)` of a partition. A null bound is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBound {
    pub lower: DataValue,
    pub upper: DataValue,
}

impl RangeBound {
    pub fn new(lower: impl Into<DataValue>, upper: impl Into<DataValue>) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    pub fn contains(&self, key: &DataValue) -> bool {
        !key.is_null()
            && (self.lower.is_null() || &self.lower <= key)
            && (self.upper.is_null() || key < &self.upper)
    }
}

/// Range partitioning of a relation on one key column.
#[derive(Debug, Clone)]
pub struct PartitionSpec {
    key_column: usize,
    bounds: Vec<RangeBound>,
}

impl PartitionSpec {
    /// `bounds` must be sorted and must not overlap.
    pub fn new(key_column: usize, bounds: Vec<RangeBound>) -> StorageResult<Self> {
        for bound in &bounds {
            if !bound.lower.is_null() && !bound.upper.is_null() && bound.lower >= bound.upper {
                return Err(TracedStorageError::invalid(format!(
                    "empty partition range [{}, {})",
                    bound.lower, bound.upper
                )));
            }
        }
        for pair in bounds.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.upper.is_null() || next.lower.is_null() || prev.upper > next.lower {
                return Err(TracedStorageError::invalid(format!(
                    "partition ranges [{}, {}) and [{}, {}) overlap or are out of order",
                    prev.lower, prev.upper, next.lower, next.upper
                )));
            }
        }
        Ok(Self { key_column, bounds })
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn num_partitions(&self) -> usize {
        self.bounds.len()
    }

    /// Partition of a tuple, `None` when no range holds its key.
    pub fn find_partition(&self, values: &[DataValue]) -> Option<usize> {
        let key = values.get(self.key_column)?;
        self.bounds.iter().position(|bound| bound.contains(key))
    }

    /// Runs of partitions whose ranges touch each other. The files of one
    /// run are merged on close.
    pub fn merge_groups(&self) -> Vec<Range<usize>> {
        let mut groups = vec![];
        let mut start = 0;
        for i in 1..self.bounds.len() {
            if self.bounds[i - 1].upper != self.bounds[i].lower {
                groups.push(start..i);
                start = i;
            }
        }
        if !self.bounds.is_empty() {
            groups.push(start..self.bounds.len());
        }
        groups
    }
}

/// Fans the tuples of a range-partitioned relation out to one
/// micro-partition per partition.
///
/// On close, the micro-partitions of adjacent partitions are merged as long as
/// the result stays within the split limits, so that sparse partitions do not
/// leave many small files behind. Merged rows get new row pointers.
pub struct TableParitionWriter {
    factory: WriterFactory,
    spec: PartitionSpec,
    split_strategy: Box<dyn FileSplitStrategy>,
    writers: Vec<Option<OrcWriter>>,
    num_tuples: usize,
}

impl TableParitionWriter {
    pub fn new(
        options: StorageOptions,
        desc: Arc<TupleDesc>,
        fs: Arc<dyn FileSystem>,
        block_ids: Arc<BlockIdAllocator>,
        spec: PartitionSpec,
    ) -> Self {
        let split_strategy = Box::new(DefaultSplitStrategy::from_options(&options));
        let writers = (0..spec.num_partitions()).map(|_| None).collect();
        Self {
            factory: WriterFactory::new(options, desc, fs, block_ids),
            spec,
            split_strategy,
            writers,
            num_tuples: 0,
        }
    }

    pub fn with_split_strategy(mut self, strategy: Box<dyn FileSplitStrategy>) -> Self {
        self.split_strategy = strategy;
        self
    }

    pub fn with_encoding_opts(mut self, encoding_opts: Vec<ColumnEncodingOption>) -> Self {
        self.factory.set_encoding_opts(encoding_opts);
        self
    }

    pub fn set_write_summary_callback(&mut self, callback: WriteSummaryCallback) {
        self.factory.set_write_summary_callback(callback);
    }

    pub fn open(&mut self) -> StorageResult<()> {
        self.factory.prepare()
    }

    pub fn write_tuple(&mut self, slot: &mut TupleSlot) -> StorageResult<()> {
        let index = self.spec.find_partition(&slot.values).ok_or_else(|| {
            TracedStorageError::invalid(format!(
                "no partition for key {}",
                slot.values
                    .get(self.spec.key_column)
                    .unwrap_or(&DataValue::Null)
            ))
        })?;

        let writer = match self.writers[index].take() {
            Some(mut writer)
                if self
                    .split_strategy
                    .should_split(writer.physical_size(), writer.num_tuples()) =>
            {
                writer.close()?;
                self.factory.create()?
            }
            Some(writer) => writer,
            None => self.factory.create()?,
        };
        self.writers[index].insert(writer).write_tuple(slot)?;
        self.num_tuples += 1;
        Ok(())
    }

    fn fits(&self, target: &OrcWriter, other: &OrcWriter) -> bool {
        !self.split_strategy.should_split(
            target.physical_size() + other.physical_size(),
            target.num_tuples() + other.num_tuples(),
        )
    }

    /// Merge the micro-partitions of every merge group, then close them.
    ///
    /// After the first error no more merges are attempted, but every writer
    /// is still closed. The first error is returned.
    pub fn close(&mut self) -> StorageResult<()> {
        let mut merged = 0;
        let mut first_error = None;
        for group in self.spec.merge_groups() {
            let mut target: Option<OrcWriter> = None;
            for index in group {
                let Some(mut writer) = self.writers[index].take() else {
                    continue;
                };
                target = match target.take() {
                    Some(mut current)
                        if first_error.is_none() && self.fits(&current, &writer) =>
                    {
                        match current.merge_to(&mut writer) {
                            Ok(()) => merged += 1,
                            Err(e) => {
                                keep_first_error(&mut first_error, Err(e));
                                keep_first_error(&mut first_error, writer.close());
                            }
                        }
                        Some(current)
                    }
                    Some(mut current) => {
                        keep_first_error(&mut first_error, current.close());
                        Some(writer)
                    }
                    None => Some(writer),
                };
            }
            if let Some(mut writer) = target {
                keep_first_error(&mut first_error, writer.close());
            }
        }
        info!(
            "close partitioned writer: {} tuples, {} micro partitions merged",
            self.num_tuples, merged
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn num_tuples(&self) -> usize {
        self.num_tuples
    }
}

fn keep_first_error(first_error: &mut Option<TracedStorageError>, result: StorageResult<()>) {
    if let Err(e) = result {
        warn!("close partitioned writer: {}", e);
        first_error.get_or_insert(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::{FileHandleRegistry, LocalFileSystem};
    use crate::storage::table::{register_in_catalog, JsonCatalog, TableReader, TableReaderOptions};
    use crate::storage::{ColumnStatsProvider, ErrorKind};
    use crate::types::{ColumnDesc, DataTypeKind};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![
            ColumnDesc::new("k", DataTypeKind::Int32),
            ColumnDesc::new("v", DataTypeKind::String),
        ]))
    }

    /// `[0,10) [10,20) [20,30)` and `[40,50) [50,60)`.
    fn spec() -> PartitionSpec {
        let bounds = [(0, 10), (10, 20), (20, 30), (40, 50), (50, 60)]
            .into_iter()
            .map(|(l, u)| RangeBound::new(l, u))
            .collect();
        PartitionSpec::new(0, bounds).unwrap()
    }

    #[test]
    fn partition_spec() {
        let spec = spec();
        assert_eq!(spec.merge_groups(), vec![0..3, 3..5]);
        assert_eq!(spec.find_partition(&[DataValue::Int32(10)]), Some(1));
        assert_eq!(spec.find_partition(&[DataValue::Int32(59)]), Some(4));
        assert_eq!(spec.find_partition(&[DataValue::Int32(35)]), None);
        assert_eq!(spec.find_partition(&[DataValue::Null]), None);

        let unbounded = PartitionSpec::new(
            0,
            vec![RangeBound::new(DataValue::Null, 0), RangeBound::new(0, DataValue::Null)],
        )
        .unwrap();
        assert_eq!(unbounded.find_partition(&[DataValue::Int32(-5)]), Some(0));
        assert_eq!(unbounded.merge_groups(), vec![0..2]);

        let overlapping = PartitionSpec::new(0, vec![RangeBound::new(0, 10), RangeBound::new(5, 20)]);
        assert_eq!(overlapping.unwrap_err().kind(), ErrorKind::Invalid);
    }

    #[test]
    fn merge_adjacent_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let catalog = JsonCatalog::open(fs.clone(), dir.path(), None)
            .unwrap()
            .into_shared();
        let options = StorageOptions::default_for_test(dir.path().to_path_buf());
        let mut writer = TableParitionWriter::new(
            options,
            desc(),
            fs.clone(),
            Arc::new(BlockIdAllocator::new(0)),
            spec(),
        );
        writer.set_write_summary_callback(register_in_catalog(catalog.clone()));
        writer.open().unwrap();

        // partitions 0, 2, 3 and 4 get rows, in this order
        let keys: Vec<i32> = (0..10).chain(20..30).chain(40..60).collect();
        for key in &keys {
            let mut slot = TupleSlot::from_values(vec![
                DataValue::Int32(*key),
                DataValue::from(format!("v{key}")),
            ]);
            writer.write_tuple(&mut slot).unwrap();
        }
        let mut bad = TupleSlot::from_values(vec![DataValue::Int32(35), DataValue::Null]);
        assert_eq!(writer.write_tuple(&mut bad).unwrap_err().kind(), ErrorKind::Invalid);
        writer.close().unwrap();
        assert_eq!(writer.num_tuples(), 40);

        let catalog = catalog.lock();
        let ids: Vec<_> = catalog.partitions().map(|m| m.micro_partition_id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(!dir.path().join("1").exists());
        assert!(!dir.path().join("3").exists());
        let stats = catalog.get(0).unwrap().stats.clone().unwrap();
        assert_eq!(
            stats.min_max(0, DataTypeKind::Int32).unwrap(),
            Some((DataValue::Int32(0), DataValue::Int32(29)))
        );

        let mut reader = TableReader::new(
            Box::new(catalog.iter()),
            fs,
            TableReaderOptions {
                path: dir.path().to_path_buf(),
                ..Default::default()
            },
        );
        reader.open().unwrap();
        let mut slot = TupleSlot::default();
        let mut read = vec![];
        while reader.read_tuple(&mut slot).unwrap() {
            read.push(slot.get(0).clone());
        }
        assert_eq!(read, keys.iter().map(|k| DataValue::Int32(*k)).collect::<Vec<_>>());
    }

    #[test]
    fn merge_respects_split_limit() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let catalog = JsonCatalog::open(fs.clone(), dir.path(), None)
            .unwrap()
            .into_shared();
        let mut options = StorageOptions::default_for_test(dir.path().to_path_buf());
        options.split_tuple_numbers = 15;
        let mut writer = TableParitionWriter::new(
            options,
            desc(),
            fs,
            Arc::new(BlockIdAllocator::new(0)),
            spec(),
        );
        writer.set_write_summary_callback(register_in_catalog(catalog.clone()));
        writer.open().unwrap();
        for key in 0..30 {
            let mut slot = TupleSlot::from_values(vec![DataValue::Int32(key), DataValue::Null]);
            writer.write_tuple(&mut slot).unwrap();
        }
        writer.close().unwrap();

        let counts: Vec<_> = catalog.lock().partitions().map(|m| m.tuple_count).collect();
        assert_eq!(counts.iter().sum::<u64>(), 30);
        assert!(counts.iter().all(|c| *c <= 15));
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn failed_merge_closes_every_writer() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FileHandleRegistry::new());
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::with_registry(registry.clone()));
        let catalog = JsonCatalog::open(fs.clone(), dir.path(), None)
            .unwrap()
            .into_shared();
        let mut options = StorageOptions::default_for_test(dir.path().to_path_buf());
        options.group_limit = 4;
        let mut writer = TableParitionWriter::new(
            options,
            desc(),
            fs,
            Arc::new(BlockIdAllocator::new(0)),
            spec(),
        );
        writer.set_write_summary_callback(register_in_catalog(catalog.clone()));
        writer.open().unwrap();
        // blocks 0, 1 and 2 hold partitions 0, 1 and 3
        for key in (0..3).chain(10..20).chain(40..45) {
            let mut slot = TupleSlot::from_values(vec![DataValue::Int32(key), DataValue::Null]);
            writer.write_tuple(&mut slot).unwrap();
        }
        // the flushed groups of block 1 can no longer be copied
        std::fs::remove_file(dir.path().join("1")).unwrap();

        assert_eq!(writer.close().unwrap_err().kind(), ErrorKind::Io);
        assert!(registry.is_empty());
        let catalog = catalog.lock();
        assert_eq!(catalog.get(0).unwrap().tuple_count, 3);
        assert_eq!(catalog.get(2).unwrap().tuple_count, 5);
        assert!(dir.path().join("0").exists());
        assert!(dir.path().join("2").exists());
    }
}
