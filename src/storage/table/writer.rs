// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::{ensure_directory, micro_partition_path, BlockIdAllocator};
use crate::storage::file::FileSystem;
use crate::storage::orc::OrcWriter;
use crate::storage::{
    ColumnEncodingOption, MicroPartitionWriter, StorageOptions, StorageResult,
    WriteSummaryCallback, WriterOptions, DEFAULT_SPLIT_SIZE, DEFAULT_SPLIT_TUPLES,
};
use crate::types::{TupleDesc, TupleSlot, PAX_MAX_TUPLES_PER_FILE};

/// Decides when a table writer starts a new micro-partition.
pub trait FileSplitStrategy: Send + Sync {
    fn split_tuple_numbers(&self) -> usize;

    fn split_file_size(&self) -> usize;

    fn should_split(&self, physical_size: usize, num_tuples: usize) -> bool {
        num_tuples >= self.split_tuple_numbers() || physical_size >= self.split_file_size()
    }
}

/// Split on whichever of the tuple and size limits is reached first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultSplitStrategy {
    split_tuples: usize,
    split_size: usize,
}

impl Default for DefaultSplitStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_SPLIT_TUPLES, DEFAULT_SPLIT_SIZE)
    }
}

impl DefaultSplitStrategy {
    pub fn new(split_tuples: usize, split_size: usize) -> Self {
        Self {
            split_tuples: split_tuples.min(PAX_MAX_TUPLES_PER_FILE),
            split_size,
        }
    }

    pub fn from_options(options: &StorageOptions) -> Self {
        Self::new(options.split_tuple_numbers, options.split_file_size)
    }
}

impl FileSplitStrategy for DefaultSplitStrategy {
    fn split_tuple_numbers(&self) -> usize {
        self.split_tuples
    }

    fn split_file_size(&self) -> usize {
        self.split_size
    }
}

/// A summary callback shared by every micro-partition of a table writer.
pub type SharedSummaryCallback = Arc<Mutex<WriteSummaryCallback>>;

/// Creates the micro-partition writers of one relation.
#[derive(Clone)]
pub struct WriterFactory {
    options: StorageOptions,
    desc: Arc<TupleDesc>,
    fs: Arc<dyn FileSystem>,
    block_ids: Arc<BlockIdAllocator>,
    encoding_opts: Vec<ColumnEncodingOption>,
    summary_callback: Option<SharedSummaryCallback>,
}

impl WriterFactory {
    pub fn new(
        options: StorageOptions,
        desc: Arc<TupleDesc>,
        fs: Arc<dyn FileSystem>,
        block_ids: Arc<BlockIdAllocator>,
    ) -> Self {
        let encoding_opts = vec![options.default_encoding; desc.natts()];
        Self {
            options,
            desc,
            fs,
            block_ids,
            encoding_opts,
            summary_callback: None,
        }
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn set_encoding_opts(&mut self, encoding_opts: Vec<ColumnEncodingOption>) {
        self.encoding_opts = encoding_opts;
    }

    pub fn set_write_summary_callback(&mut self, callback: WriteSummaryCallback) {
        self.summary_callback = Some(Arc::new(Mutex::new(callback)));
    }

    /// Create the relation directory.
    pub fn prepare(&self) -> StorageResult<()> {
        ensure_directory(
            self.fs.as_ref(),
            &self.options.path,
            self.options.fs_options.as_ref(),
        )
    }

    /// Create the writer of a new micro-partition.
    pub fn create(&self) -> StorageResult<OrcWriter> {
        let block_id = self.block_ids.allocate()?;
        let mut options = WriterOptions::from_storage_options(
            &self.options,
            micro_partition_path(&self.options.path, block_id),
            block_id,
            self.desc.clone(),
        );
        options.encoding_opts = self.encoding_opts.clone();
        let mut writer = OrcWriter::create(options, self.fs.clone())?;
        if let Some(callback) = &self.summary_callback {
            let callback = callback.clone();
            writer.set_write_summary_callback(Box::new(move |summary| {
                let mut callback = callback.lock();
                (*callback)(summary)
            }));
        }
        Ok(writer)
    }
}

/// Writes the tuples of a relation into a sequence of micro-partitions.
///
/// The current micro-partition is created on the first tuple, and replaced by
/// a new one once the split strategy says so.
pub struct TableWriter {
    factory: WriterFactory,
    split_strategy: Box<dyn FileSplitStrategy>,
    writer: Option<OrcWriter>,
    num_tuples: usize,
    num_files: usize,
}

impl TableWriter {
    pub fn new(
        options: StorageOptions,
        desc: Arc<TupleDesc>,
        fs: Arc<dyn FileSystem>,
        block_ids: Arc<BlockIdAllocator>,
    ) -> Self {
        let split_strategy = Box::new(DefaultSplitStrategy::from_options(&options));
        Self {
            factory: WriterFactory::new(options, desc, fs, block_ids),
            split_strategy,
            writer: None,
            num_tuples: 0,
            num_files: 0,
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

    /// Invoked once per closed micro-partition.
    pub fn set_write_summary_callback(&mut self, callback: WriteSummaryCallback) {
        self.factory.set_write_summary_callback(callback);
    }

    pub fn open(&mut self) -> StorageResult<()> {
        self.factory.prepare()
    }

    pub fn write_tuple(&mut self, slot: &mut TupleSlot) -> StorageResult<()> {
        let split = self.writer.as_ref().map_or(false, |w| {
            w.num_tuples() > 0 && self.split_strategy.should_split(w.physical_size(), w.num_tuples())
        });
        if split {
            self.close_current()?;
        }
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                self.num_files += 1;
                self.factory.create()?
            }
        };
        self.writer.insert(writer).write_tuple(slot)?;
        self.num_tuples += 1;
        Ok(())
    }

    fn close_current(&mut self) -> StorageResult<()> {
        if let Some(mut writer) = self.writer.take() {
            info!(
                "split micro partition {:?} at {} tuples, {} bytes",
                writer.file_name(),
                writer.num_tuples(),
                writer.physical_size()
            );
            writer.close()?;
        }
        Ok(())
    }

    /// Close the current micro-partition.
    pub fn close(&mut self) -> StorageResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }

    /// Block id of the micro-partition being written.
    pub fn current_block_id(&self) -> Option<u32> {
        self.writer.as_ref().map(|w| w.block_id())
    }

    pub fn num_tuples(&self) -> usize {
        self.num_tuples
    }

    /// Micro-partitions created so far.
    pub fn num_files(&self) -> usize {
        self.num_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::LocalFileSystem;
    use crate::storage::table::{register_in_catalog, JsonCatalog};
    use crate::types::{ColumnDesc, DataTypeKind, DataValue, ItemPointer};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![
            ColumnDesc::new("a", DataTypeKind::Int32),
            ColumnDesc::new("b", DataTypeKind::String),
        ]))
    }

    #[test]
    fn default_strategy() {
        let strategy = DefaultSplitStrategy::default();
        assert_eq!(strategy.split_tuple_numbers(), 163840);
        assert_eq!(strategy.split_file_size(), 64 << 20);
        assert!(!strategy.should_split(1 << 20, 1000));
        assert!(strategy.should_split(64 << 20, 1));
        assert!(strategy.should_split(0, 163840));
    }

    #[test]
    fn split_by_tuples() {
        let dir = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let catalog = JsonCatalog::open(fs.clone(), dir.path(), None)
            .unwrap()
            .into_shared();
        let mut options = StorageOptions::default_for_test(dir.path().join("rel"));
        options.split_tuple_numbers = 100;
        let mut writer = TableWriter::new(
            options,
            desc(),
            fs,
            Arc::new(BlockIdAllocator::new(1)),
        );
        writer.set_write_summary_callback(register_in_catalog(catalog.clone()));
        writer.open().unwrap();

        for i in 0..101 {
            let mut slot = TupleSlot::from_values(vec![
                DataValue::Int32(i),
                DataValue::from(format!("row {i}")),
            ]);
            writer.write_tuple(&mut slot).unwrap();
            if i == 100 {
                assert_eq!(slot.tid, ItemPointer::from_pax(2, 0));
            }
        }
        assert_eq!(writer.current_block_id(), Some(2));
        // the first file was registered when it was split off
        assert_eq!(catalog.lock().len(), 1);
        writer.close().unwrap();

        let catalog = catalog.lock();
        assert_eq!(writer.num_files(), 2);
        assert_eq!(writer.num_tuples(), 101);
        let counts: Vec<_> = catalog.partitions().map(|m| m.tuple_count).collect();
        assert_eq!(counts, vec![100, 1]);
        assert_eq!(catalog.get(1).unwrap().file_name, "1");
        assert!(dir.path().join("rel").join("2").exists());
        assert_eq!(catalog.next_block_id(), 3);
    }
}
