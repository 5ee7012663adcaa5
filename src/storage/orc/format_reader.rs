// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::ops::Range;

use prost::Message;
use tracing::debug;

use super::{ORC_TAIL_READ_SIZE, PAX_MAGIC, PAX_MAJOR_VERSION, POST_SCRIPT_SIZE_LEN};
use crate::storage::file::File;
use crate::storage::proto::{
    Footer, PostScript, StreamKind, StripeFooter, StripeInformation, TypeKind,
};
use crate::storage::{
    verify_checksum, DataBuffer, PaxColumn, PaxColumns, StorageFormat, StorageResult,
    TracedStorageError,
};
use crate::types::{ColumnDesc, DataTypeKind, TupleDesc, PAX_MAX_TUPLES_PER_FILE};

/// Low-level access to a micro-partition file: tail parsing, the group
/// directory and the decoding of group streams.
pub struct OrcFormatReader {
    file: Box<dyn File>,
    postscript: PostScript,
    footer: Footer,
    column_kinds: Vec<DataTypeKind>,
    format: StorageFormat,
    /// `stripe_row_offsets[i]` is the index of the first row of group `i`;
    /// the last entry is the number of rows.
    stripe_row_offsets: Vec<u64>,
}

/// One stream of a group, located relative to the start of the group.
#[derive(Debug, Clone)]
struct StreamRange {
    kind: StreamKind,
    column: usize,
    range: Range<usize>,
    padding: usize,
}

fn corrupted(message: impl ToString) -> TracedStorageError {
    TracedStorageError::invalid_format(message)
}

impl OrcFormatReader {
    /// Parse and validate the tail of `file`.
    pub fn open(file: Box<dyn File>) -> StorageResult<Self> {
        let file_length = file.file_length()? as usize;
        if file_length < POST_SCRIPT_SIZE_LEN {
            return Err(corrupted(format!(
                "file {:?} of {} bytes is too short",
                file.path(),
                file_length
            )));
        }

        let tail_length = file_length.min(ORC_TAIL_READ_SIZE);
        let tail_offset = file_length - tail_length;
        let mut tail = vec![0u8; tail_length];
        file.pread_n(&mut tail, tail_offset as u64)?;

        // reads `len` bytes ending `end` bytes before the end of the file
        let read_tail = |end: usize, len: usize| -> StorageResult<Vec<u8>> {
            if end + len <= tail_length {
                Ok(tail[tail_length - end - len..tail_length - end].to_vec())
            } else {
                let mut buf = vec![0u8; len];
                file.pread_n(&mut buf, (file_length - end - len) as u64)?;
                Ok(buf)
            }
        };

        let mut len_bytes = [0u8; POST_SCRIPT_SIZE_LEN];
        len_bytes.copy_from_slice(&tail[tail_length - POST_SCRIPT_SIZE_LEN..]);
        let postscript_length = u64::from_le_bytes(len_bytes) as usize;
        if postscript_length > file_length - POST_SCRIPT_SIZE_LEN {
            return Err(corrupted(format!(
                "postscript of {} bytes in a file of {} bytes",
                postscript_length, file_length
            )));
        }
        let postscript = PostScript::decode(&read_tail(POST_SCRIPT_SIZE_LEN, postscript_length)?[..])?;
        if postscript.magic != PAX_MAGIC {
            return Err(corrupted(format!("bad magic {:?}", postscript.magic)));
        }
        if postscript.major_version != PAX_MAJOR_VERSION {
            return Err(corrupted(format!(
                "unsupported version {}.{}",
                postscript.major_version, postscript.minor_version
            )));
        }

        let footer_length = postscript.footer_length as usize;
        let tail_size = footer_length
            .checked_add(postscript_length + POST_SCRIPT_SIZE_LEN)
            .filter(|size| *size <= file_length);
        let Some(tail_size) = tail_size else {
            return Err(corrupted(format!(
                "footer of {} bytes in a file of {} bytes",
                footer_length, file_length
            )));
        };
        let footer_bytes = read_tail(postscript_length + POST_SCRIPT_SIZE_LEN, footer_length)?;
        verify_checksum(&footer_bytes, postscript.footer_checksum)?;
        let footer = Footer::decode(&footer_bytes[..])?;

        if footer.content_length != (file_length - tail_size) as u64 {
            return Err(corrupted(format!(
                "content of {} bytes and tail of {} bytes in a file of {} bytes",
                footer.content_length, tail_size, file_length
            )));
        }
        let column_kinds = Self::validate_schema(&footer)?;
        let stripe_row_offsets = Self::validate_stripes(&footer, column_kinds.len())?;
        let format = StorageFormat::try_from(footer.storage_format)
            .map_err(|_| corrupted(format!("unknown storage format {}", footer.storage_format)))?;

        debug!(
            "open micro partition {:?}: {} groups, {} rows",
            file.path(),
            footer.stripes.len(),
            footer.number_of_rows
        );
        Ok(Self {
            file,
            postscript,
            footer,
            column_kinds,
            format,
            stripe_row_offsets,
        })
    }

    fn validate_schema(footer: &Footer) -> StorageResult<Vec<DataTypeKind>> {
        let root = footer
            .types
            .first()
            .ok_or_else(|| corrupted("missing schema root"))?;
        if root.kind != TypeKind::Struct as i32 {
            return Err(corrupted("schema root is not a struct"));
        }
        if root.subtypes.len() + 1 != footer.types.len() {
            return Err(corrupted(format!(
                "schema root has {} subtypes, footer has {} column types",
                root.subtypes.len(),
                footer.types.len() - 1
            )));
        }
        footer.types[1..]
            .iter()
            .map(|ty| {
                TypeKind::try_from(ty.kind)
                    .ok()
                    .and_then(|kind| kind.data_type())
                    .ok_or_else(|| corrupted(format!("unsupported column type {}", ty.kind)))
            })
            .collect()
    }

    fn validate_stripes(footer: &Footer, columns: usize) -> StorageResult<Vec<u64>> {
        let mut offsets = Vec::with_capacity(footer.stripes.len() + 1);
        let mut rows = 0u64;
        let mut expected_offset = 0u64;
        for (i, stripe) in footer.stripes.iter().enumerate() {
            if stripe.col_stats.len() != columns {
                return Err(corrupted(format!(
                    "group {} has stats of {} columns, schema has {}",
                    i,
                    stripe.col_stats.len(),
                    columns
                )));
            }
            if stripe.offset != expected_offset || stripe.data_length > stripe.footer_length {
                return Err(corrupted(format!("group {} has a bad location", i)));
            }
            offsets.push(rows);
            expected_offset = expected_offset
                .checked_add(stripe.footer_length)
                .ok_or_else(|| corrupted(format!("group {} ends past the file", i)))?;
            rows = rows
                .checked_add(stripe.number_of_rows)
                .ok_or_else(|| corrupted(format!("group {} overflows the row count", i)))?;
        }
        offsets.push(rows);
        if rows > PAX_MAX_TUPLES_PER_FILE as u64 {
            return Err(corrupted(format!("{} rows in one micro partition", rows)));
        }
        if rows != footer.number_of_rows || expected_offset != footer.content_length {
            return Err(corrupted(format!(
                "groups hold {} rows in {} bytes, footer records {} rows in {} bytes",
                rows, expected_offset, footer.number_of_rows, footer.content_length
            )));
        }
        Ok(offsets)
    }

    pub fn close(&mut self) -> StorageResult<()> {
        self.file.close()
    }

    pub fn postscript(&self) -> &PostScript {
        &self.postscript
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn storage_format(&self) -> StorageFormat {
        self.format
    }

    pub fn column_kinds(&self) -> &[DataTypeKind] {
        &self.column_kinds
    }

    /// Schema of the file. Column names are not stored and read as `c<i>`.
    pub fn tuple_desc(&self) -> TupleDesc {
        let columns = self.footer.statistics.as_ref().map(|s| &s.columns[..]);
        self.column_kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let collation = columns
                    .and_then(|c| c.get(i))
                    .and_then(|s| s.info.as_ref())
                    .map_or(0, |info| info.collation);
                ColumnDesc::new(format!("c{}", i), *kind).with_collation(collation)
            })
            .collect()
    }

    pub fn group_nums(&self) -> usize {
        self.footer.stripes.len()
    }

    pub fn tuple_count(&self) -> usize {
        self.footer.number_of_rows as usize
    }

    pub fn stripe(&self, group_index: usize) -> StorageResult<&StripeInformation> {
        self.footer.stripes.get(group_index).ok_or_else(|| {
            TracedStorageError::invalid(format!(
                "group {} out of range of {} groups",
                group_index,
                self.footer.stripes.len()
            ))
        })
    }

    /// Index of the first row of a group.
    pub fn group_row_offset(&self, group_index: usize) -> usize {
        self.stripe_row_offsets[group_index] as usize
    }

    /// Group holding `row_index` and the index of the row inside it.
    pub fn locate_row(&self, row_index: usize) -> Option<(usize, usize)> {
        if row_index >= self.tuple_count() {
            return None;
        }
        let row = row_index as u64;
        let group = self.stripe_row_offsets.partition_point(|offset| *offset <= row) - 1;
        Some((group, row_index - self.stripe_row_offsets[group] as usize))
    }

    pub fn read_stripe_footer(&self, group_index: usize) -> StorageResult<StripeFooter> {
        let stripe = self.stripe(group_index)?;
        let mut buf = vec![0u8; (stripe.footer_length - stripe.data_length) as usize];
        self.file
            .pread_n(&mut buf, stripe.offset + stripe.data_length)?;
        Ok(StripeFooter::decode(&buf[..])?)
    }

    fn stream_ranges(
        &self,
        stripe: &StripeInformation,
        stripe_footer: &StripeFooter,
    ) -> StorageResult<Vec<StreamRange>> {
        let mut ranges = Vec::with_capacity(stripe_footer.streams.len());
        let mut offset = 0usize;
        for stream in &stripe_footer.streams {
            let kind = StreamKind::try_from(stream.kind)
                .map_err(|_| corrupted(format!("unknown stream kind {}", stream.kind)))?;
            let column = stream.column as usize;
            if column >= self.column_kinds.len() || stream.padding as u64 > stream.length {
                return Err(corrupted(format!(
                    "bad stream {:?} of column {}",
                    kind, stream.column
                )));
            }
            let end = usize::try_from(stream.length)
                .ok()
                .and_then(|length| offset.checked_add(length))
                .filter(|end| *end as u64 <= stripe.data_length)
                .ok_or_else(|| {
                    corrupted(format!(
                        "stream {:?} of column {} ends past its group",
                        kind, stream.column
                    ))
                })?;
            ranges.push(StreamRange {
                kind,
                column,
                range: offset..end,
                padding: stream.padding as usize,
            });
            offset = end;
        }
        if offset as u64 != stripe.data_length {
            return Err(corrupted(format!(
                "streams of {} bytes in a group of {} bytes",
                offset, stripe.data_length
            )));
        }
        Ok(ranges)
    }

    /// Decode a group. Only columns selected by `projection` are read; the
    /// streams of adjacent selected columns are fetched with a single read.
    pub fn read_group(
        &self,
        group_index: usize,
        projection: Option<&[bool]>,
        buffer: &mut DataBuffer<u8>,
    ) -> StorageResult<PaxColumns> {
        let stripe = self.stripe(group_index)?;
        let stripe_footer = self.read_stripe_footer(group_index)?;
        let natts = self.column_kinds.len();
        if stripe_footer.column_encodings.len() != natts {
            return Err(corrupted(format!(
                "group {} has encodings of {} columns, schema has {}",
                group_index,
                stripe_footer.column_encodings.len(),
                natts
            )));
        }
        let projected =
            |column: usize| projection.map_or(true, |p| p.get(column).copied().unwrap_or(false));
        let streams = self.stream_ranges(stripe, &stripe_footer)?;

        // merge adjacent projected streams into read requests
        let mut reads: Vec<Range<usize>> = vec![];
        for stream in streams.iter().filter(|s| projected(s.column)) {
            match reads.last_mut() {
                Some(last) if last.end == stream.range.start => last.end = stream.range.end,
                _ => reads.push(stream.range.clone()),
            }
        }

        // the buffer mirrors the group layout, skipped regions are left stale
        buffer.clear();
        let size = reads.last().map_or(0, |r| r.end);
        buffer.reserve(size);
        buffer.brush(size)?;
        for read in &reads {
            self.file.pread_n(
                &mut buffer.as_mut_slice()[read.clone()],
                stripe.offset + read.start as u64,
            )?;
        }
        let data = buffer.as_slice();

        let rows = stripe.number_of_rows as usize;
        let mut columns = PaxColumns::new(self.format);
        for (column, kind) in self.column_kinds.iter().enumerate() {
            if !projected(column) {
                columns.append(None);
                continue;
            }
            let stream_of = |kind: StreamKind| {
                streams
                    .iter()
                    .find(|s| s.column == column && s.kind == kind)
                    .map(|s| &data[s.range.start..s.range.end - s.padding])
            };
            let data_stream = stream_of(StreamKind::Data).ok_or_else(|| {
                corrupted(format!("column {} of group {} has no data", column, group_index))
            })?;
            columns.append(Some(PaxColumn::decode(
                *kind,
                self.format,
                rows,
                stream_of(StreamKind::Present),
                stream_of(StreamKind::Length),
                data_stream,
                &stripe_footer.column_encodings[column],
            )?));
        }
        columns.set_rows(rows);
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::file::{FileSystem, LocalFileSystem, OpenFlags};
    use crate::storage::orc::OrcWriter;
    use crate::storage::{ErrorKind, MicroPartitionWriter, WriterOptions};
    use crate::types::{DataValue, TupleSlot};

    fn write_file(path: &std::path::Path, rows: i32) {
        let desc = Arc::new(TupleDesc::new(vec![
            ColumnDesc::new("a", DataTypeKind::Int32),
            ColumnDesc::new("b", DataTypeKind::Blob),
            ColumnDesc::new("c", DataTypeKind::Float64),
        ]));
        let mut options = WriterOptions::new(path, 0, desc);
        options.group_limit = 10;
        let mut writer = OrcWriter::create(options, Arc::new(LocalFileSystem::new())).unwrap();
        for i in 0..rows {
            let mut slot = TupleSlot::from_values(vec![
                DataValue::Int32(i),
                DataValue::Blob(vec![i as u8; i as usize % 3]),
                DataValue::from(i as f64 / 2.0),
            ]);
            writer.write_tuple(&mut slot).unwrap();
        }
        writer.close().unwrap();
    }

    fn open(path: &std::path::Path) -> StorageResult<OrcFormatReader> {
        let fs = LocalFileSystem::new();
        OrcFormatReader::open(fs.open(path, OpenFlags::READ, None)?)
    }

    #[test]
    fn group_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        write_file(&path, 25);
        let reader = open(&path).unwrap();
        assert_eq!(reader.group_nums(), 3);
        assert_eq!(reader.tuple_count(), 25);
        assert_eq!(reader.locate_row(0), Some((0, 0)));
        assert_eq!(reader.locate_row(10), Some((1, 0)));
        assert_eq!(reader.locate_row(24), Some((2, 4)));
        assert_eq!(reader.locate_row(25), None);
        assert_eq!(reader.tuple_desc().natts(), 3);
    }

    #[test]
    fn projected_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        write_file(&path, 25);
        let reader = open(&path).unwrap();
        let mut buffer = DataBuffer::new(0);
        let columns = reader
            .read_group(1, Some(&[false, true, false]), &mut buffer)
            .unwrap();
        assert!(columns.get(0).is_none());
        assert!(columns.get(2).is_none());
        assert_eq!(columns.rows(), 10);
        assert_eq!(
            columns.get(1).unwrap().get_value(4).unwrap(),
            DataValue::Blob(vec![14; 2])
        );
        let all = reader.read_group(1, None, &mut buffer).unwrap();
        assert_eq!(all.get(0).unwrap().get_value(4).unwrap(), DataValue::Int32(14));
        assert!(reader.read_group(3, None, &mut buffer).is_err());
    }

    #[test]
    fn corrupted_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        write_file(&path, 5);
        let mut bytes = std::fs::read(&path).unwrap();
        let len = bytes.len();

        // flip a byte of the footer
        let ps_len = u64::from_le_bytes(bytes[len - 8..].try_into().unwrap()) as usize;
        bytes[len - 8 - ps_len - 1] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert_eq!(open(&path).err().unwrap().kind(), ErrorKind::Corrupted);

        std::fs::write(&path, [1, 2, 3]).unwrap();
        assert_eq!(open(&path).err().unwrap().kind(), ErrorKind::InvalidOrcFormat);

        std::fs::write(&path, u64::MAX.to_le_bytes()).unwrap();
        assert_eq!(open(&path).err().unwrap().kind(), ErrorKind::InvalidOrcFormat);
    }

    /// Rewrite the footer of `path` after `f` changed it.
    fn rewrite_footer(path: &std::path::Path, f: impl FnOnce(&mut Footer)) {
        let reader = open(path).unwrap();
        let mut footer = reader.footer().clone();
        let mut postscript = reader.postscript().clone();
        let content_length = footer.content_length as usize;
        f(&mut footer);
        let footer_bytes = footer.encode_to_vec();
        postscript.footer_length = footer_bytes.len() as u64;
        postscript.footer_checksum = crate::storage::build_checksum(&footer_bytes);
        let postscript_bytes = postscript.encode_to_vec();

        let mut bytes = std::fs::read(path).unwrap();
        bytes.truncate(content_length);
        bytes.extend(&footer_bytes);
        bytes.extend(&postscript_bytes);
        bytes.extend((postscript_bytes.len() as u64).to_le_bytes());
        std::fs::write(path, &bytes).unwrap();
    }

    #[test]
    fn overflowing_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0");
        write_file(&path, 25);
        // an untouched rewrite still opens
        rewrite_footer(&path, |_| {});
        assert_eq!(open(&path).unwrap().tuple_count(), 25);

        rewrite_footer(&path, |footer| {
            footer.stripes[1].footer_length = u64::MAX;
            footer.stripes[1].data_length = u64::MAX;
        });
        assert_eq!(open(&path).err().unwrap().kind(), ErrorKind::InvalidOrcFormat);

        let path = dir.path().join("1");
        write_file(&path, 25);
        rewrite_footer(&path, |footer| {
            footer.stripes[0].number_of_rows = u64::MAX;
            footer.number_of_rows = u64::MAX;
        });
        assert_eq!(open(&path).err().unwrap().kind(), ErrorKind::InvalidOrcFormat);

        // a stream longer than its group
        let path = dir.path().join("2");
        write_file(&path, 25);
        let reader = open(&path).unwrap();
        let mut stripe_footer = reader.read_stripe_footer(0).unwrap();
        stripe_footer.streams[0].length = u64::MAX;
        let stripe = reader.stripe(0).unwrap().clone();
        assert_eq!(
            reader
                .stream_ranges(&stripe, &stripe_footer)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidOrcFormat
        );
    }
}
