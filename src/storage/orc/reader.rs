// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::{GroupStatsInfo, OrcFormatReader, PaxGroup};
use crate::storage::file::File;
use crate::storage::{
    DataBuffer, FilterLevel, MicroPartitionReader, ReaderOptions, StorageFormat, StorageResult,
    TracedStorageError,
};
use crate::types::{ItemPointer, TupleDesc, TupleSlot};

/// Decoded groups kept by a reader. The sequential cursor holds its own
/// reference, so two entries let random access run next to a scan without
/// evicting each other.
const GROUP_CACHE_CAPACITY: usize = 2;

/// Tuple-at-a-time reader of one micro-partition file.
///
/// [`read_tuple`](MicroPartitionReader::read_tuple) and
/// [`get_tuple`](MicroPartitionReader::get_tuple) are independent cursors over
/// a shared cache of decoded groups.
pub struct OrcReader {
    format_reader: OrcFormatReader,
    options: ReaderOptions,
    file_desc: TupleDesc,
    /// Number of columns of the output tuples.
    natts: usize,
    /// Output columns that must be filled.
    needed: Vec<bool>,
    /// Columns of the file to decode, `None` for all.
    projection: Option<Vec<bool>>,
    group_cache: LruCache<usize, Arc<PaxGroup>>,
    buffer: DataBuffer<u8>,

    /// Next group of the sequential cursor.
    next_group: usize,
    seq_group: Option<Arc<PaxGroup>>,
    /// Next row of `seq_group`.
    seq_row: usize,
}

impl OrcReader {
    pub fn open(file: Box<dyn File>, options: ReaderOptions) -> StorageResult<Self> {
        let format_reader = OrcFormatReader::open(file)?;
        let file_desc = format_reader.tuple_desc();
        let natts = options
            .target_desc
            .as_ref()
            .map_or(file_desc.natts(), |d| d.natts());

        let needed: Vec<bool> = (0..natts)
            .map(|i| {
                let dropped = options
                    .target_desc
                    .as_ref()
                    .map_or(false, |d| d.column(i).dropped);
                let projected = options.filter.as_ref().map_or(true, |f| f.is_projected(i));
                !dropped && projected
            })
            .collect();
        let file_projection: Vec<bool> = (0..file_desc.natts())
            .map(|i| needed.get(i).copied().unwrap_or(false))
            .collect();
        let projection = if file_projection.iter().all(|p| *p) {
            None
        } else {
            Some(file_projection)
        };

        let capacity = NonZeroUsize::new(GROUP_CACHE_CAPACITY)
            .ok_or_else(|| TracedStorageError::logic("group cache capacity must be positive"))?;
        Ok(Self {
            format_reader,
            options,
            file_desc,
            natts,
            needed,
            projection,
            group_cache: LruCache::new(capacity),
            buffer: DataBuffer::new(0),
            next_group: 0,
            seq_group: None,
            seq_row: 0,
        })
    }

    pub fn format_reader(&self) -> &OrcFormatReader {
        &self.format_reader
    }

    pub fn storage_format(&self) -> StorageFormat {
        self.format_reader.storage_format()
    }

    /// Schema recorded in the file.
    pub fn file_desc(&self) -> &TupleDesc {
        &self.file_desc
    }

    pub fn block_id(&self) -> u32 {
        self.options.block_id
    }

    /// Rewind the sequential cursor.
    pub fn rewind(&mut self) {
        self.next_group = 0;
        self.seq_group = None;
        self.seq_row = 0;
    }

    fn is_deleted(&self, row_index: usize) -> bool {
        self.options
            .visibility_bitmap
            .as_ref()
            .map_or(false, |bitmap| bitmap.test(row_index))
    }

    /// Whether the filter proves group `index` holds no matching row.
    fn prune_group(&self, index: usize) -> StorageResult<bool> {
        let Some(filter) = self.options.filter.as_ref().filter(|f| f.has_scan_keys()) else {
            return Ok(false);
        };
        let stats = GroupStatsInfo::new(self.format_reader.stripe(index)?);
        Ok(!filter.test_scan(&stats, &self.file_desc, FilterLevel::Group))
    }

    fn load_group(&mut self, index: usize) -> StorageResult<Arc<PaxGroup>> {
        if let Some(group) = self.group_cache.get(&index) {
            return Ok(group.clone());
        }
        let projection = self.projection.as_deref();
        let columns = match &self.options.reused_buffer {
            Some(buffer) => self
                .format_reader
                .read_group(index, projection, &mut buffer.lock())?,
            None => self
                .format_reader
                .read_group(index, projection, &mut self.buffer)?,
        };
        let group = Arc::new(PaxGroup::new(
            index,
            self.format_reader.group_row_offset(index),
            columns,
        ));
        self.group_cache.put(index, group.clone());
        Ok(group)
    }

    fn fill_slot(&self, group: &PaxGroup, row: usize, slot: &mut TupleSlot) -> StorageResult<()> {
        slot.clear(self.natts);
        let file_natts = self.file_desc.natts();
        for (i, needed) in self.needed.iter().enumerate() {
            if !needed {
                continue;
            }
            if i >= file_natts {
                if let Some(missing) = self
                    .options
                    .target_desc
                    .as_ref()
                    .and_then(|d| d.column(i).missing.clone())
                {
                    slot.values[i] = missing;
                }
                continue;
            }
            slot.values[i] = group.get_value(i, row)?;
        }
        slot.tid = ItemPointer::from_pax(self.options.block_id, (group.row_offset() + row) as u32);
        Ok(())
    }
}

impl MicroPartitionReader for OrcReader {
    fn close(&mut self) -> StorageResult<()> {
        self.group_cache.clear();
        self.seq_group = None;
        self.format_reader.close()
    }

    fn read_tuple(&mut self, slot: &mut TupleSlot) -> StorageResult<bool> {
        loop {
            let current = self
                .seq_group
                .as_ref()
                .filter(|group| self.seq_row < group.rows())
                .cloned();
            let group = match current {
                Some(group) => group,
                None => {
                    while self.next_group < self.format_reader.group_nums()
                        && self.prune_group(self.next_group)?
                    {
                        self.next_group += 1;
                    }
                    if self.next_group >= self.format_reader.group_nums() {
                        self.seq_group = None;
                        return Ok(false);
                    }
                    let group = self.load_group(self.next_group)?;
                    self.next_group += 1;
                    self.seq_row = 0;
                    self.seq_group = Some(group);
                    continue;
                }
            };
            let row = self.seq_row;
            self.seq_row += 1;
            if self.is_deleted(group.row_offset() + row) {
                continue;
            }
            self.fill_slot(&group, row, slot)?;
            return Ok(true);
        }
    }

    fn get_tuple(&mut self, slot: &mut TupleSlot, row_index: usize) -> StorageResult<bool> {
        let Some((group_index, row)) = self.format_reader.locate_row(row_index) else {
            return Ok(false);
        };
        if self.is_deleted(row_index) {
            return Ok(false);
        }
        let group = self.load_group(group_index)?;
        self.fill_slot(&group, row, slot)?;
        Ok(true)
    }

    fn group_nums(&self) -> usize {
        self.format_reader.group_nums()
    }

    fn tuple_count(&self) -> usize {
        self.format_reader.tuple_count()
    }

    fn read_group(&mut self, group_index: usize) -> StorageResult<Arc<PaxGroup>> {
        self.format_reader.stripe(group_index)?;
        self.load_group(group_index)
    }

    fn get_group_stats_info(&self, group_index: usize) -> StorageResult<GroupStatsInfo<'_>> {
        Ok(GroupStatsInfo::new(self.format_reader.stripe(group_index)?))
    }
}
