// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::{
    open_micro_partition, register_in_catalog, BlockIdAllocator, SharedCatalog,
    TableReaderOptions, TableWriter,
};
use crate::storage::file::FileSystem;
use crate::storage::visimap::{read_visimap, write_visimap, VisimapCache};
use crate::storage::{
    Bitmap8, MicroPartitionMetadata, MicroPartitionReader, StorageOptions, StorageResult,
    TracedStorageError,
};
use crate::types::{ItemPointer, TupleDesc, TupleSlot};

/// Deletes rows of a relation.
///
/// Deleted rows are collected per micro-partition, then applied either by
/// rewriting the surviving rows into new micro-partitions ([`delete`]) or by
/// recording them in a visibility map next to the untouched file
/// ([`delete_with_visibility_map`]).
///
/// [`delete`]: TableDeleter::delete
/// [`delete_with_visibility_map`]: TableDeleter::delete_with_visibility_map
pub struct TableDeleter {
    options: StorageOptions,
    desc: Arc<TupleDesc>,
    fs: Arc<dyn FileSystem>,
    catalog: SharedCatalog,
    block_ids: Arc<BlockIdAllocator>,
    visimap_cache: Option<Arc<VisimapCache>>,
    deletes: BTreeMap<u32, Bitmap8>,
}

impl TableDeleter {
    pub fn new(
        options: StorageOptions,
        desc: Arc<TupleDesc>,
        fs: Arc<dyn FileSystem>,
        catalog: SharedCatalog,
        block_ids: Arc<BlockIdAllocator>,
    ) -> Self {
        Self {
            options,
            desc,
            fs,
            catalog,
            block_ids,
            visimap_cache: None,
            deletes: BTreeMap::new(),
        }
    }

    pub fn with_visimap_cache(mut self, cache: Arc<VisimapCache>) -> Self {
        self.visimap_cache = Some(cache);
        self
    }

    /// Mark the row at `tid` as deleted.
    pub fn mark_delete(&mut self, tid: ItemPointer) {
        self.deletes
            .entry(tid.block_id())
            .or_insert_with(|| Bitmap8::new(0))
            .set(tid.row_index() as usize);
    }

    /// Mark every set bit of `bitmap` as a deleted row of `block_id`.
    pub fn mark_delete_bitmap(&mut self, block_id: u32, bitmap: &Bitmap8) {
        self.deletes
            .entry(block_id)
            .or_insert_with(|| Bitmap8::new(0))
            .union_with(bitmap);
    }

    pub fn pending_blocks(&self) -> usize {
        self.deletes.len()
    }

    fn metadata(&self, block_id: u32) -> StorageResult<MicroPartitionMetadata> {
        self.catalog
            .lock()
            .get(block_id)
            .cloned()
            .ok_or_else(|| TracedStorageError::not_found("micro partition", block_id))
    }

    /// The pending deletes of a micro-partition merged with its visibility map.
    fn combined_bitmap(
        &self,
        meta: &MicroPartitionMetadata,
        deletes: &Bitmap8,
    ) -> StorageResult<Bitmap8> {
        if let Some(last) = deletes.iter_ones().last() {
            if last as u64 >= meta.tuple_count {
                return Err(TracedStorageError::invalid(format!(
                    "row {} of micro partition {} does not exist, it holds {} rows",
                    last, meta.micro_partition_id, meta.tuple_count
                )));
            }
        }
        let mut bitmap = Bitmap8::new(meta.tuple_count as usize);
        if let Some(name) = &meta.visimap_name {
            let existing = read_visimap(
                self.fs.as_ref(),
                &self.options.path.join(name),
                self.options.fs_options.as_ref(),
            )?;
            bitmap.union_with(&existing);
        }
        bitmap.union_with(deletes);
        bitmap.truncate(meta.tuple_count as usize);
        Ok(bitmap)
    }

    fn remove_visimap(&self, meta: &MicroPartitionMetadata) -> StorageResult<()> {
        if let Some(name) = &meta.visimap_name {
            let path = self.options.path.join(name);
            self.fs.delete(&path, self.options.fs_options.as_ref())?;
            if let Some(cache) = &self.visimap_cache {
                cache.invalidate(&path);
            }
        }
        Ok(())
    }

    /// Rewrite the surviving rows of every touched micro-partition into new
    /// micro-partitions and drop the old files. Survivors get new row
    /// pointers.
    pub fn delete(&mut self) -> StorageResult<()> {
        let deletes = std::mem::take(&mut self.deletes);
        if deletes.is_empty() {
            return Ok(());
        }

        let mut writer = TableWriter::new(
            self.options.clone(),
            self.desc.clone(),
            self.fs.clone(),
            self.block_ids.clone(),
        );
        writer.set_write_summary_callback(register_in_catalog(self.catalog.clone()));
        writer.open()?;

        let read_options = TableReaderOptions {
            path: self.options.path.clone(),
            fs_options: self.options.fs_options.clone(),
            target_desc: Some(self.desc.clone()),
            ..Default::default()
        };
        let mut replaced = vec![];
        let mut slot = TupleSlot::default();
        for (block_id, bitmap) in &deletes {
            let mut meta = self.metadata(*block_id)?;
            let bitmap = self.combined_bitmap(&meta, bitmap)?;
            meta.visimap_name = None;
            let mut reader = open_micro_partition(self.fs.as_ref(), &read_options, &meta)?;
            let mut survivors = 0;
            for row in 0..reader.tuple_count() {
                if bitmap.test(row) {
                    continue;
                }
                if reader.get_tuple(&mut slot, row)? {
                    writer.write_tuple(&mut slot)?;
                    survivors += 1;
                }
            }
            reader.close()?;
            info!(
                "rewrite micro partition {}: {} of {} rows survive",
                block_id, survivors, meta.tuple_count
            );
            replaced.push(*block_id);
        }
        writer.close()?;

        for block_id in replaced {
            let Some(meta) = self.catalog.lock().remove(block_id) else {
                continue;
            };
            self.fs.delete(
                &self.options.path.join(&meta.file_name),
                self.options.fs_options.as_ref(),
            )?;
            self.remove_visimap(&meta)?;
        }
        self.catalog.lock().save()
    }

    /// Persist the pending deletes as visibility maps, leaving the data files
    /// untouched.
    pub fn delete_with_visibility_map(&mut self) -> StorageResult<()> {
        let deletes = std::mem::take(&mut self.deletes);
        for (block_id, bitmap) in &deletes {
            let meta = self.metadata(*block_id)?;
            let bitmap = self.combined_bitmap(&meta, bitmap)?;
            let deleted = bitmap.count_ones();
            // a visimap is named by its block and deleted row count, so a
            // grown map never reuses the name of the map it replaces
            let name = format!("{}_{}.visimap", block_id, deleted);
            if meta.visimap_name.as_deref() == Some(name.as_str()) {
                continue;
            }
            write_visimap(
                self.fs.as_ref(),
                &self.options.path.join(&name),
                &bitmap,
                self.options.fs_options.as_ref(),
            )?;
            self.remove_visimap(&meta)?;
            self.catalog.lock().get_mut(*block_id)?.visimap_name = Some(name);
            info!(
                "micro partition {}: {} of {} rows deleted",
                block_id, deleted, meta.tuple_count
            );
        }
        self.catalog.lock().save()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::storage::file::LocalFileSystem;
    use crate::storage::table::{JsonCatalog, TableReader};
    use crate::storage::ErrorKind;
    use crate::types::{ColumnDesc, DataTypeKind, DataValue};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![ColumnDesc::new("a", DataTypeKind::Int32)]))
    }

    struct Relation {
        options: StorageOptions,
        fs: Arc<dyn FileSystem>,
        catalog: SharedCatalog,
        block_ids: Arc<BlockIdAllocator>,
    }

    /// Two micro-partitions of 20 rows.
    fn relation(dir: &Path) -> Relation {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let catalog = JsonCatalog::open(fs.clone(), dir, None).unwrap().into_shared();
        let block_ids = Arc::new(BlockIdAllocator::new(0));
        let mut options = StorageOptions::default_for_test(dir.to_path_buf());
        options.split_tuple_numbers = 20;
        let mut writer = TableWriter::new(options.clone(), desc(), fs.clone(), block_ids.clone());
        writer.set_write_summary_callback(register_in_catalog(catalog.clone()));
        writer.open().unwrap();
        for i in 0..40 {
            writer
                .write_tuple(&mut TupleSlot::from_values(vec![DataValue::Int32(i)]))
                .unwrap();
        }
        writer.close().unwrap();
        Relation {
            options,
            fs,
            catalog,
            block_ids,
        }
    }

    fn deleter(rel: &Relation) -> TableDeleter {
        TableDeleter::new(
            rel.options.clone(),
            desc(),
            rel.fs.clone(),
            rel.catalog.clone(),
            rel.block_ids.clone(),
        )
    }

    fn scan(rel: &Relation) -> Vec<i32> {
        let mut reader = TableReader::new(
            Box::new(rel.catalog.lock().iter()),
            rel.fs.clone(),
            TableReaderOptions {
                path: rel.options.path.clone(),
                ..Default::default()
            },
        );
        reader.open().unwrap();
        let mut slot = TupleSlot::default();
        let mut values = vec![];
        while reader.read_tuple(&mut slot).unwrap() {
            match slot.get(0) {
                DataValue::Int32(v) => values.push(*v),
                other => panic!("unexpected {other}"),
            }
        }
        values
    }

    #[test]
    fn delete_rewrites_survivors() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let mut deleter = deleter(&rel);
        for row in (0..20).filter(|r| r % 2 == 0) {
            deleter.mark_delete(ItemPointer::from_pax(1, row));
        }
        deleter.delete().unwrap();

        let ids: Vec<_> = rel.catalog.lock().partitions().map(|m| m.micro_partition_id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(!dir.path().join("1").exists());
        let mut expected: Vec<i32> = (0..20).collect();
        expected.extend((20..40).filter(|v| v % 2 == 1));
        assert_eq!(scan(&rel), expected);

        // the catalog was persisted
        let reloaded = JsonCatalog::open(rel.fs.clone(), dir.path(), None).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(2).unwrap().tuple_count, 10);
    }

    #[test]
    fn delete_with_visibility_map() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let mut deleter = deleter(&rel);
        deleter.mark_delete(ItemPointer::from_pax(0, 3));
        deleter.delete_with_visibility_map().unwrap();
        assert_eq!(
            rel.catalog.lock().get(0).unwrap().visimap_name.as_deref(),
            Some("0_1.visimap")
        );

        // a second delete extends the existing map
        let mut more = Bitmap8::new(20);
        more.set(4);
        more.set(19);
        deleter.mark_delete_bitmap(0, &more);
        deleter.delete_with_visibility_map().unwrap();
        assert_eq!(
            rel.catalog.lock().get(0).unwrap().visimap_name.as_deref(),
            Some("0_3.visimap")
        );
        assert!(!dir.path().join("0_1.visimap").exists());
        assert!(dir.path().join("0").exists());

        let values = scan(&rel);
        assert_eq!(values.len(), 37);
        assert!(!values.contains(&3) && !values.contains(&4) && !values.contains(&19));
    }

    #[test]
    fn delete_errors() {
        let dir = tempfile::tempdir().unwrap();
        let rel = relation(dir.path());
        let mut deleter = deleter(&rel);
        deleter.mark_delete(ItemPointer::from_pax(0, 20));
        assert_eq!(
            deleter.delete_with_visibility_map().unwrap_err().kind(),
            ErrorKind::Invalid
        );
        deleter.mark_delete(ItemPointer::from_pax(9, 0));
        assert_eq!(deleter.delete().unwrap_err().kind(), ErrorKind::NotFound);
    }
}
