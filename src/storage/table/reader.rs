// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::MicroPartitionIterator;
use crate::storage::file::{FileSystem, FileSystemOptions, OpenFlags};
use crate::storage::orc::OrcReader;
use crate::storage::visimap::{read_visimap, VisimapCache};
use crate::storage::{
    MicroPartitionMetadata, MicroPartitionReader, PaxFilter, ReaderOptions, SharedBuffer,
    StorageResult,
};
use crate::types::{TupleDesc, TupleSlot};

/// How the micro-partitions of a relation are opened.
#[derive(Clone, Default)]
pub struct TableReaderOptions {
    /// Relation directory.
    pub path: PathBuf,
    pub fs_options: Option<FileSystemOptions>,
    pub filter: Option<Arc<PaxFilter>>,
    pub reused_buffer: Option<SharedBuffer>,
    pub target_desc: Option<Arc<TupleDesc>>,
    pub visimap_cache: Option<Arc<VisimapCache>>,
}

/// Open the file of `meta`, together with its visibility map.
pub fn open_micro_partition(
    fs: &dyn FileSystem,
    options: &TableReaderOptions,
    meta: &MicroPartitionMetadata,
) -> StorageResult<OrcReader> {
    let visibility_bitmap = match &meta.visimap_name {
        Some(name) => {
            let path = options.path.join(name);
            Some(match &options.visimap_cache {
                Some(cache) => cache.load_visimap(&path)?,
                None => Arc::new(read_visimap(fs, &path, options.fs_options.as_ref())?),
            })
        }
        None => None,
    };
    let file = fs.open(
        &options.path.join(&meta.file_name),
        OpenFlags::READ,
        options.fs_options.as_ref(),
    )?;
    debug!("open micro partition {}", meta.micro_partition_id);
    OrcReader::open(
        file,
        ReaderOptions {
            block_id: meta.micro_partition_id,
            reused_buffer: options.reused_buffer.clone(),
            filter: options.filter.clone(),
            visibility_bitmap,
            target_desc: options.target_desc.clone(),
        },
    )
}

/// Reads the tuples of a relation, one micro-partition after the other.
pub struct TableReader {
    iterator: Box<dyn MicroPartitionIterator>,
    fs: Arc<dyn FileSystem>,
    options: TableReaderOptions,
    reader: Option<OrcReader>,
    /// Rows of the micro-partitions before the current one.
    rows_before: usize,
}

impl TableReader {
    pub fn new(
        iterator: Box<dyn MicroPartitionIterator>,
        fs: Arc<dyn FileSystem>,
        options: TableReaderOptions,
    ) -> Self {
        Self {
            iterator,
            fs,
            options,
            reader: None,
            rows_before: 0,
        }
    }

    /// Open the first micro-partition.
    pub fn open(&mut self) -> StorageResult<()> {
        self.open_next()?;
        Ok(())
    }

    /// Start over from the first micro-partition.
    pub fn reopen(&mut self) -> StorageResult<()> {
        self.close_current()?;
        self.iterator.rewind();
        self.rows_before = 0;
        self.open()
    }

    fn close_current(&mut self) -> StorageResult<()> {
        if let Some(mut reader) = self.reader.take() {
            self.rows_before += reader.tuple_count();
            reader.close()?;
        }
        Ok(())
    }

    /// Move to the next micro-partition, `false` when there is none.
    fn open_next(&mut self) -> StorageResult<bool> {
        self.close_current()?;
        match self.iterator.next() {
            Some(meta) => {
                self.reader = Some(open_micro_partition(
                    self.fs.as_ref(),
                    &self.options,
                    &meta,
                )?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Block id of the current micro-partition.
    pub fn current_block_id(&self) -> Option<u32> {
        self.reader.as_ref().map(|r| r.block_id())
    }

    pub fn read_tuple(&mut self, slot: &mut TupleSlot) -> StorageResult<bool> {
        loop {
            let Some(reader) = &mut self.reader else {
                return Ok(false);
            };
            if reader.read_tuple(slot)? {
                return Ok(true);
            }
            if !self.open_next()? {
                return Ok(false);
            }
        }
    }

    /// Read the tuple at `ordinal`, counting the rows of every micro-partition
    /// in iteration order, deleted rows included. Moving backwards reopens
    /// the relation. `false` when the row is deleted or past the end.
    pub fn get_tuple(&mut self, slot: &mut TupleSlot, ordinal: usize) -> StorageResult<bool> {
        if ordinal < self.rows_before {
            self.reopen()?;
        }
        loop {
            let Some(reader) = &mut self.reader else {
                return Ok(false);
            };
            let count = reader.tuple_count();
            if ordinal < self.rows_before + count {
                return reader.get_tuple(slot, ordinal - self.rows_before);
            }
            if !self.open_next()? {
                return Ok(false);
            }
        }
    }

    pub fn close(&mut self) -> StorageResult<()> {
        self.close_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::LocalFileSystem;
    use crate::storage::table::{
        register_in_catalog, BlockIdAllocator, JsonCatalog, TableWriter, VecMicroPartitionIterator,
    };
    use crate::storage::visimap::write_visimap;
    use crate::storage::{Bitmap8, StorageOptions};
    use crate::types::{ColumnDesc, DataTypeKind, DataValue, ItemPointer};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![ColumnDesc::new("a", DataTypeKind::Int64)]))
    }

    /// Three micro-partitions of 10 rows each.
    fn write_relation(dir: &std::path::Path) -> JsonCatalog {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let catalog = JsonCatalog::open(fs.clone(), dir, None).unwrap().into_shared();
        let mut options = StorageOptions::default_for_test(dir.to_path_buf());
        options.split_tuple_numbers = 10;
        let mut writer = TableWriter::new(options, desc(), fs, Arc::new(BlockIdAllocator::new(0)));
        writer.set_write_summary_callback(register_in_catalog(catalog.clone()));
        writer.open().unwrap();
        for i in 0..30 {
            writer
                .write_tuple(&mut TupleSlot::from_values(vec![DataValue::Int64(i)]))
                .unwrap();
        }
        writer.close().unwrap();
        drop(writer);
        let Ok(catalog) = Arc::try_unwrap(catalog) else {
            panic!("catalog is still shared");
        };
        catalog.into_inner()
    }

    fn options(dir: &std::path::Path) -> TableReaderOptions {
        TableReaderOptions {
            path: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn read_across_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = write_relation(dir.path());
        assert_eq!(catalog.len(), 3);
        let mut reader = TableReader::new(
            Box::new(catalog.iter()),
            Arc::new(LocalFileSystem::new()),
            options(dir.path()),
        );
        reader.open().unwrap();

        let mut slot = TupleSlot::default();
        let mut values = vec![];
        while reader.read_tuple(&mut slot).unwrap() {
            values.push(slot.get(0).clone());
        }
        assert_eq!(values, (0..30).map(DataValue::Int64).collect::<Vec<_>>());
        assert_eq!(slot.tid, ItemPointer::from_pax(2, 9));

        assert!(reader.get_tuple(&mut slot, 25).unwrap());
        assert_eq!(slot.get(0), &DataValue::Int64(25));
        // backwards
        assert!(reader.get_tuple(&mut slot, 3).unwrap());
        assert_eq!(slot.get(0), &DataValue::Int64(3));
        assert_eq!(reader.current_block_id(), Some(0));
        assert!(!reader.get_tuple(&mut slot, 30).unwrap());
        reader.close().unwrap();
    }

    #[test]
    fn reopen_applies_visimap() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = write_relation(dir.path());
        let fs = LocalFileSystem::new();
        let mut bitmap = Bitmap8::new(10);
        bitmap.set(0);
        bitmap.set(9);
        write_visimap(&fs, &dir.path().join("1_2.visimap"), &bitmap, None).unwrap();
        catalog.get_mut(1).unwrap().visimap_name = Some("1_2.visimap".into());

        let mut reader = TableReader::new(
            Box::new(catalog.iter()),
            Arc::new(LocalFileSystem::new()),
            options(dir.path()),
        );
        reader.open().unwrap();
        let mut slot = TupleSlot::default();
        for _ in 0..2 {
            let mut count = 0;
            while reader.read_tuple(&mut slot).unwrap() {
                assert_ne!(slot.get(0), &DataValue::Int64(10));
                assert_ne!(slot.get(0), &DataValue::Int64(19));
                count += 1;
            }
            assert_eq!(count, 28);
            reader.reopen().unwrap();
        }
        assert!(!reader.get_tuple(&mut slot, 10).unwrap());
        assert!(reader.get_tuple(&mut slot, 11).unwrap());
    }

    #[test]
    fn empty_relation() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = TableReader::new(
            Box::new(VecMicroPartitionIterator::default()),
            Arc::new(LocalFileSystem::new()),
            options(dir.path()),
        );
        reader.open().unwrap();
        let mut slot = TupleSlot::default();
        assert!(!reader.read_tuple(&mut slot).unwrap());
        assert!(!reader.get_tuple(&mut slot, 0).unwrap());
    }
}
