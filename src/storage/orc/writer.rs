// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use prost::Message;
use tracing::{debug, info};

use super::{PAX_MAGIC, PAX_MAJOR_VERSION, PAX_MINOR_VERSION, PAX_WRITER_ID};
use crate::storage::file::{File, FileSystem, OpenFlags};
use crate::storage::proto::{
    Footer, PostScript, Stream, StripeFooter, StripeInformation, Type, TypeKind,
};
use crate::storage::{
    build_checksum, ColumnEncodingOption, MicroPartitionStats, MicroPartitionWriter, PaxColumns,
    StorageFormat, StorageResult, TracedStorageError, WriteSummary, WriteSummaryCallback,
    WriterOptions,
};
use crate::types::{DataValue, ItemPointer, TupleDesc, TupleSlot, PAX_MAX_TUPLES_PER_FILE};

/// Schema types of a file: a root struct followed by one type per column.
pub fn build_schema_types(desc: &TupleDesc) -> Vec<Type> {
    let mut types = Vec::with_capacity(desc.natts() + 1);
    types.push(Type {
        kind: TypeKind::Struct as i32,
        subtypes: (1..=desc.natts() as u32).collect(),
    });
    types.extend(desc.kinds().map(|kind| Type {
        kind: TypeKind::from(kind) as i32,
        subtypes: vec![],
    }));
    types
}

/// Append one group to `file` at `offset`, returning its directory entry.
fn write_stripe(
    file: &mut dyn File,
    columns: &PaxColumns,
    stats: &MicroPartitionStats,
    offset: u64,
) -> StorageResult<StripeInformation> {
    let mut streams = vec![];
    let mut column_encodings = vec![];
    let buffer = columns.get_data_buffer(
        |kind, column, length, padding, rows| {
            streams.push(Stream {
                kind: kind as i32,
                column: column as u32,
                length,
                padding,
                rows,
            })
        },
        |_, encoding| column_encodings.push(encoding),
    )?;
    let footer = StripeFooter {
        streams,
        column_encodings,
    }
    .encode_to_vec();

    file.write_n(buffer.as_slice())?;
    file.write_n(&footer)?;

    let data_length = buffer.used() as u64;
    Ok(StripeInformation {
        offset,
        data_length,
        footer_length: data_length + footer.len() as u64,
        number_of_rows: columns.rows() as u64,
        col_stats: stats.serialize()?.columns,
    })
}

/// Writes one micro-partition file.
///
/// Tuples are buffered per group; a group is encoded and appended to the file
/// when it reaches `group_limit` rows or on [`MicroPartitionWriter::flush`].
pub struct OrcWriter {
    options: WriterOptions,
    fs: Arc<dyn FileSystem>,
    file: Box<dyn File>,
    encodings: Vec<ColumnEncodingOption>,
    has_dropped: bool,

    /// Rows of the current group.
    columns: PaxColumns,
    group_stats: MicroPartitionStats,
    file_stats: MicroPartitionStats,

    stripes: Vec<StripeInformation>,
    current_offset: u64,
    num_tuples: usize,
    physical_size: usize,

    summary_callback: Option<WriteSummaryCallback>,
    closed: bool,
}

impl OrcWriter {
    /// Create the file of a new micro-partition. Fails if it already exists.
    pub fn create(options: WriterOptions, fs: Arc<dyn FileSystem>) -> StorageResult<Self> {
        if options.group_limit == 0 {
            return Err(TracedStorageError::invalid("group limit must be positive"));
        }
        let encodings = options.resolved_encodings()?;
        let columns = PaxColumns::build(&options.desc, &encodings, options.storage_format)?;
        let file = fs.open(
            &options.file_name,
            OpenFlags::WRITE_NEW,
            options.fs_options.as_ref(),
        )?;
        debug!("create micro partition {:?}", options.file_name);
        Ok(Self {
            has_dropped: options.desc.columns().iter().any(|c| c.dropped),
            group_stats: MicroPartitionStats::new(options.desc.clone()),
            file_stats: MicroPartitionStats::new(options.desc.clone()),
            options,
            fs,
            file,
            encodings,
            columns,
            stripes: vec![],
            current_offset: 0,
            num_tuples: 0,
            physical_size: 0,
            summary_callback: None,
            closed: false,
        })
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn file_name(&self) -> &Path {
        &self.options.file_name
    }

    pub fn block_id(&self) -> u32 {
        self.options.block_id
    }

    pub fn storage_format(&self) -> StorageFormat {
        self.options.storage_format
    }

    /// Groups written to the file so far.
    pub fn group_nums(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(TracedStorageError::logic(format!(
                "micro partition {:?} is already closed",
                self.options.file_name
            )));
        }
        Ok(())
    }

    fn update_physical_size(&mut self) {
        let current = self.current_offset as usize + self.columns.physical_size();
        self.physical_size = self.physical_size.max(current);
    }

    fn append_stripe(&mut self, stripe: StripeInformation) {
        self.current_offset += stripe.footer_length;
        self.stripes.push(stripe);
    }

    fn check_tuple(&self, values: &[DataValue]) -> StorageResult<()> {
        let desc = &self.options.desc;
        if values.len() != desc.natts() {
            return Err(TracedStorageError::logic(format!(
                "tuple of {} values written to a relation of {} columns",
                values.len(),
                desc.natts()
            )));
        }
        for (i, (value, column)) in values.iter().zip(desc.columns()).enumerate() {
            if !column.dropped && !value.is_null() && !value.matches(column.kind) {
                return Err(TracedStorageError::logic(format!(
                    "value {} does not match column {} of type {}",
                    value, i, column.kind
                )));
            }
        }
        Ok(())
    }

    /// Vertical merge: move every row of `other` into this file and delete
    /// the file of `other`.
    ///
    /// Groups already written by `other` are copied without re-encoding; its
    /// buffered rows become a group of their own. Rows of `other` get new row
    /// pointers. The file of `other` is only deleted once all of its rows are
    /// written here; on error `other` stays open.
    pub fn merge_to(&mut self, other: &mut OrcWriter) -> StorageResult<()> {
        self.check_open()?;
        other.check_open()?;
        if self.options.storage_format != other.options.storage_format {
            return Err(TracedStorageError::logic(format!(
                "cannot merge a {:?} micro partition into a {:?} micro partition",
                other.options.storage_format, self.options.storage_format
            )));
        }
        if self.options.desc.natts() != other.options.desc.natts() {
            return Err(TracedStorageError::logic(format!(
                "cannot merge a micro partition of {} columns into one of {} columns",
                other.options.desc.natts(),
                self.options.desc.natts()
            )));
        }
        if self.num_tuples + other.num_tuples > PAX_MAX_TUPLES_PER_FILE {
            return Err(TracedStorageError::logic(format!(
                "merged micro partition would hold {} tuples",
                self.num_tuples + other.num_tuples
            )));
        }

        // keep the row pointers of our buffered rows stable
        self.flush()?;

        if !other.stripes.is_empty() {
            other.file.flush()?;
            let mut source = other.fs.open(
                &other.options.file_name,
                OpenFlags::READ,
                other.options.fs_options.as_ref(),
            )?;
            let mut buffer = vec![];
            for stripe in &other.stripes {
                buffer.resize(stripe.footer_length as usize, 0);
                source.pread_n(&mut buffer, stripe.offset)?;
                self.file.write_n(&buffer)?;
                let stripe = StripeInformation {
                    offset: self.current_offset,
                    ..stripe.clone()
                };
                self.append_stripe(stripe);
            }
            source.close()?;
        }

        if other.columns.rows() > 0 {
            let stripe = write_stripe(
                self.file.as_mut(),
                &other.columns,
                &other.group_stats,
                self.current_offset,
            )?;
            self.append_stripe(stripe);
        }

        other.file.close()?;
        other
            .fs
            .delete(&other.options.file_name, other.options.fs_options.as_ref())?;
        other.closed = true;

        self.num_tuples += other.num_tuples;
        self.file_stats.merge_from(&other.file_stats)?;
        self.update_physical_size();
        info!(
            "merged micro partition {:?} into {:?}, {} tuples in {} groups",
            other.options.file_name,
            self.options.file_name,
            self.num_tuples,
            self.stripes.len()
        );
        Ok(())
    }
}

impl MicroPartitionWriter for OrcWriter {
    fn write_tuple(&mut self, slot: &mut TupleSlot) -> StorageResult<()> {
        self.check_open()?;
        self.check_tuple(&slot.values)?;
        if self.num_tuples >= PAX_MAX_TUPLES_PER_FILE {
            return Err(TracedStorageError::logic(format!(
                "micro partition {:?} is full",
                self.options.file_name
            )));
        }

        let values = if self.has_dropped {
            Cow::Owned(
                slot.values
                    .iter()
                    .zip(self.options.desc.columns())
                    .map(|(v, c)| if c.dropped { DataValue::Null } else { v.clone() })
                    .collect(),
            )
        } else {
            Cow::Borrowed(&slot.values[..])
        };
        self.columns.append_tuple(&values)?;
        self.group_stats.add_row(&values)?;
        self.file_stats.add_row(&values)?;

        slot.tid = ItemPointer::from_pax(self.options.block_id, self.num_tuples as u32);
        self.num_tuples += 1;

        if self.columns.rows() >= self.options.group_limit {
            self.flush()?;
        }
        self.update_physical_size();
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_open()?;
        if self.columns.rows() == 0 {
            return Ok(());
        }
        let stripe = write_stripe(
            self.file.as_mut(),
            &self.columns,
            &self.group_stats,
            self.current_offset,
        )?;
        debug!(
            "flush group {} of {:?}: {} rows, {} bytes",
            self.stripes.len(),
            self.options.file_name,
            stripe.number_of_rows,
            stripe.footer_length
        );
        self.append_stripe(stripe);
        self.file.flush()?;

        self.columns = PaxColumns::build(
            &self.options.desc,
            &self.encodings,
            self.options.storage_format,
        )?;
        self.group_stats.reset();
        self.update_physical_size();
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;

        let footer = Footer {
            content_length: self.current_offset,
            number_of_rows: self.num_tuples as u64,
            types: build_schema_types(&self.options.desc),
            stripes: self.stripes.clone(),
            statistics: Some(self.file_stats.serialize()?),
            storage_format: self.options.storage_format as i32,
        }
        .encode_to_vec();
        let postscript = PostScript {
            footer_length: footer.len() as u64,
            major_version: PAX_MAJOR_VERSION,
            minor_version: PAX_MINOR_VERSION,
            writer: PAX_WRITER_ID,
            footer_checksum: build_checksum(&footer),
            magic: PAX_MAGIC.into(),
        }
        .encode_to_vec();

        self.file.write_n(&footer)?;
        self.file.write_n(&postscript)?;
        self.file.write_n(&(postscript.len() as u64).to_le_bytes())?;
        self.file.flush()?;
        self.file.close()?;
        self.closed = true;

        let file_size = self.current_offset
            + footer.len() as u64
            + postscript.len() as u64
            + super::POST_SCRIPT_SIZE_LEN as u64;
        self.physical_size = self.physical_size.max(file_size as usize);
        info!(
            "close micro partition {:?}: {} tuples, {} groups, {} bytes",
            self.options.file_name,
            self.num_tuples,
            self.stripes.len(),
            file_size
        );

        if let Some(callback) = self.summary_callback.as_mut() {
            callback(WriteSummary {
                file_name: self.options.file_name.clone(),
                block_id: self.options.block_id,
                num_tuples: self.num_tuples as u64,
                file_size,
                stats: self.file_stats.serialize()?,
            });
        }
        Ok(())
    }

    fn physical_size(&self) -> usize {
        self.physical_size
    }

    fn num_tuples(&self) -> usize {
        self.num_tuples
    }

    fn set_write_summary_callback(&mut self, callback: WriteSummaryCallback) {
        self.summary_callback = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::storage::file::LocalFileSystem;
    use crate::storage::orc::OrcReader;
    use crate::storage::{ErrorKind, MicroPartitionReader, ReaderOptions};
    use crate::types::{ColumnDesc, DataTypeKind};

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![
            ColumnDesc::new("id", DataTypeKind::Int64),
            ColumnDesc::new("name", DataTypeKind::String),
        ]))
    }

    fn writer(dir: &Path, name: &str, format: StorageFormat) -> OrcWriter {
        let mut options = WriterOptions::new(dir.join(name), 1, desc());
        options.group_limit = 4;
        options.storage_format = format;
        OrcWriter::create(options, Arc::new(LocalFileSystem::new())).unwrap()
    }

    fn row(i: i64) -> TupleSlot {
        TupleSlot::from_values(vec![DataValue::Int64(i), DataValue::from(format!("row-{i}"))])
    }

    #[test]
    fn close_reports_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer(dir.path(), "1", StorageFormat::OrcRowGroup);
        let summaries = Arc::new(Mutex::new(vec![]));
        let sink = summaries.clone();
        writer.set_write_summary_callback(Box::new(move |s| sink.lock().push(s)));

        let mut last_size = 0;
        for i in 0..10 {
            let mut slot = row(i);
            writer.write_tuple(&mut slot).unwrap();
            assert_eq!(slot.tid, ItemPointer::from_pax(1, i as u32));
            assert!(writer.physical_size() >= last_size);
            last_size = writer.physical_size();
        }
        assert_eq!(writer.group_nums(), 2);
        writer.close().unwrap();
        writer.close().unwrap();

        let summaries = summaries.lock();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].num_tuples, 10);
        let len = std::fs::metadata(dir.path().join("1")).unwrap().len();
        assert_eq!(summaries[0].file_size, len);
        assert!(writer.write_tuple(&mut row(0)).is_err());
    }

    #[test]
    fn reject_bad_tuples() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer(dir.path(), "1", StorageFormat::OrcRowGroup);
        let mut short = TupleSlot::from_values(vec![DataValue::Int64(1)]);
        assert_eq!(writer.write_tuple(&mut short).unwrap_err().kind(), ErrorKind::Logic);
        let mut mistyped =
            TupleSlot::from_values(vec![DataValue::Int32(1), DataValue::from("x")]);
        assert_eq!(
            writer.write_tuple(&mut mistyped).unwrap_err().kind(),
            ErrorKind::Logic
        );
        assert_eq!(writer.num_tuples(), 0);
    }

    #[test]
    fn create_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let _first = writer(dir.path(), "1", StorageFormat::OrcRowGroup);
        let options = WriterOptions::new(dir.path().join("1"), 1, desc());
        let err = OrcWriter::create(options, Arc::new(LocalFileSystem::new()))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn merge_rejects_mixed_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = writer(dir.path(), "a", StorageFormat::OrcRowGroup);
        let mut b = writer(dir.path(), "b", StorageFormat::OrcVector);
        b.write_tuple(&mut row(1)).unwrap();
        assert_eq!(a.merge_to(&mut b).unwrap_err().kind(), ErrorKind::Logic);
        // the source keeps its rows
        b.close().unwrap();
        assert!(dir.path().join("b").exists());
        assert_eq!(b.num_tuples(), 1);
        a.close().unwrap();
    }

    #[test]
    fn failed_merge_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = writer(dir.path(), "a", StorageFormat::OrcRowGroup);
        let mut b = writer(dir.path(), "b", StorageFormat::OrcRowGroup);
        for i in 0..6 {
            b.write_tuple(&mut row(i)).unwrap();
        }
        // a closed target cannot take the rows
        a.close().unwrap();
        assert!(a.merge_to(&mut b).is_err());
        assert!(dir.path().join("b").exists());
        b.close().unwrap();
        let file = LocalFileSystem::new()
            .open(&dir.path().join("b"), OpenFlags::READ, None)
            .unwrap();
        assert_eq!(OrcReader::open(file, ReaderOptions::default()).unwrap().tuple_count(), 6);
    }

    #[test]
    fn merge_deletes_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = writer(dir.path(), "a", StorageFormat::OrcRowGroup);
        let mut b = writer(dir.path(), "b", StorageFormat::OrcRowGroup);
        for i in 0..3 {
            a.write_tuple(&mut row(i)).unwrap();
        }
        for i in 0..6 {
            b.write_tuple(&mut row(i)).unwrap();
        }
        a.merge_to(&mut b).unwrap();
        assert!(!dir.path().join("b").exists());
        // merging closed the source
        assert!(b.write_tuple(&mut row(9)).is_err());
        assert_eq!(a.num_tuples(), 9);
        // a's buffered rows, b's flushed group, b's buffered rows
        assert_eq!(a.group_nums(), 3);
        a.close().unwrap();
    }
}
