// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::OnceLock;

use bytes::{Buf, BufMut};

use super::encoding::{decode_stream, encode_stream};
use crate::storage::encode::{decode_value, encode_value};
use crate::storage::proto::ColumnEncoding;
use crate::storage::{
    Bitmap8, ColumnEncodingKind, ColumnEncodingOption, DataBuffer, StorageFormat, StorageResult,
    TracedStorageError,
};
use crate::types::{DataTypeKind, DataValue};

pub const DEFAULT_CAPACITY: usize = 2048;
const DECIMAL_WIDTH: usize = 16;

/// In-memory layout class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaxColumnKind {
    /// Fixed-width values of 1, 2, 4 or 8 bytes.
    Fixed(usize),
    /// Variable-length values addressed by offsets.
    VarLen,
    /// 16-byte decimals.
    Decimal,
}

impl PaxColumnKind {
    pub fn fixed(width: usize) -> StorageResult<Self> {
        match width {
            1 | 2 | 4 | 8 => Ok(Self::Fixed(width)),
            _ => Err(TracedStorageError::logic(format!(
                "fixed-width column of {} bytes is not supported",
                width
            ))),
        }
    }

    pub fn for_type(kind: DataTypeKind) -> StorageResult<Self> {
        match kind {
            DataTypeKind::Decimal => Ok(Self::Decimal),
            DataTypeKind::String | DataTypeKind::Blob => Ok(Self::VarLen),
            _ => Self::fixed(kind.type_len().unwrap_or(0)),
        }
    }

    /// Bytes per value, `None` for variable-length columns.
    pub const fn width(&self) -> Option<usize> {
        match self {
            Self::Fixed(width) => Some(*width),
            Self::Decimal => Some(DECIMAL_WIDTH),
            Self::VarLen => None,
        }
    }
}

/// A stream of a column ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedStream {
    pub bytes: Vec<u8>,
    /// Entries described by the stream.
    pub rows: usize,
}

/// All streams of one column plus the encoding record of the group footer.
#[derive(Debug, Clone)]
pub struct EncodedColumn {
    pub present: Option<EncodedStream>,
    pub length: Option<EncodedStream>,
    pub data: EncodedStream,
    pub encoding: ColumnEncoding,
}

/// One column of a group.
///
/// Values are stored in "slots". In the row-group layout only non-null rows
/// have a slot; in the vector layout every row has one and null rows hold a
/// zeroed (or empty) value.
#[derive(Debug, Clone)]
pub struct PaxColumn {
    type_kind: DataTypeKind,
    kind: PaxColumnKind,
    format: StorageFormat,
    encoding: ColumnEncodingOption,
    data: DataBuffer<u8>,
    /// Slot boundaries of variable-length values, starting with 0.
    offsets: Vec<u32>,
    /// A set bit marks a non-null row. `None` while the column has no null.
    present: Option<Bitmap8>,
    rows: usize,
    non_null_rows: usize,
    /// `slot_prefix[row]` is the number of slots before `row` (row-group layout).
    slot_prefix: OnceLock<Vec<u32>>,
}

impl PaxColumn {
    pub fn new(
        type_kind: DataTypeKind,
        format: StorageFormat,
        encoding: ColumnEncodingOption,
    ) -> StorageResult<Self> {
        let kind = PaxColumnKind::for_type(type_kind)?;
        let encoding = encoding.resolve(type_kind)?;
        Ok(Self {
            type_kind,
            kind,
            format,
            encoding,
            data: DataBuffer::new(DEFAULT_CAPACITY),
            offsets: match kind {
                PaxColumnKind::VarLen => vec![0],
                _ => vec![],
            },
            present: None,
            rows: 0,
            non_null_rows: 0,
            slot_prefix: OnceLock::new(),
        })
    }

    pub fn type_kind(&self) -> DataTypeKind {
        self.type_kind
    }

    pub fn kind(&self) -> PaxColumnKind {
        self.kind
    }

    pub fn storage_format(&self) -> StorageFormat {
        self.format
    }

    pub fn encoding(&self) -> ColumnEncodingOption {
        self.encoding
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn non_null_rows(&self) -> usize {
        self.non_null_rows
    }

    pub fn has_null(&self) -> bool {
        self.non_null_rows < self.rows
    }

    pub fn all_null(&self) -> bool {
        self.rows > 0 && self.non_null_rows == 0
    }

    pub fn present(&self) -> Option<&Bitmap8> {
        self.present.as_ref()
    }

    /// Width of a value, -1 for variable-length columns.
    pub fn type_length(&self) -> i32 {
        self.kind.width().map_or(-1, |w| w as i32)
    }

    /// Size of the values before encoding.
    pub fn origin_length(&self) -> usize {
        self.data.used()
    }

    /// Bytes held in memory by the column.
    pub fn physical_size(&self) -> usize {
        self.data.used()
            + self.offsets.len() * std::mem::size_of::<u32>()
            + self
                .present
                .as_ref()
                .map_or(0, |p| Bitmap8::minimal_stored_bytes(p.len()))
    }

    fn is_vector(&self) -> bool {
        self.format == StorageFormat::OrcVector
    }

    fn slots(&self) -> usize {
        if self.is_vector() {
            self.rows
        } else {
            self.non_null_rows
        }
    }

    fn push_slot(&mut self, value: &[u8]) {
        self.data.extend(value);
        if self.kind == PaxColumnKind::VarLen {
            self.offsets.push(self.data.used() as u32);
        }
    }

    /// Append a non-null value given as its canonical bytes.
    pub fn append(&mut self, value: &[u8]) -> StorageResult<()> {
        if let Some(width) = self.kind.width() {
            if value.len() != width {
                return Err(TracedStorageError::logic(format!(
                    "append {} bytes to a {}-byte column",
                    value.len(),
                    width
                )));
            }
        }
        self.push_slot(value);
        if let Some(present) = &mut self.present {
            present.push(true);
        }
        self.rows += 1;
        self.non_null_rows += 1;
        self.slot_prefix.take();
        Ok(())
    }

    pub fn append_null(&mut self) {
        let rows = self.rows;
        self.present
            .get_or_insert_with(|| Bitmap8::filled(rows))
            .push(false);
        if self.is_vector() {
            let placeholder = vec![0u8; self.kind.width().unwrap_or(0)];
            self.push_slot(&placeholder);
        }
        self.rows += 1;
        self.slot_prefix.take();
    }

    pub fn append_value(&mut self, value: &DataValue) -> StorageResult<()> {
        if value.is_null() {
            self.append_null();
            return Ok(());
        }
        let mut bytes = Vec::with_capacity(self.kind.width().unwrap_or(16));
        encode_value(value, self.type_kind, &mut bytes)?;
        self.append(&bytes)
    }

    fn slot_prefix(&self) -> &[u32] {
        self.slot_prefix.get_or_init(|| {
            let mut prefix = Vec::with_capacity(self.rows + 1);
            let mut count = 0u32;
            prefix.push(0);
            for row in 0..self.rows {
                if self.present.as_ref().map_or(true, |p| p.test(row)) {
                    count += 1;
                }
                prefix.push(count);
            }
            prefix
        })
    }

    /// Slot holding `row`, `None` if the row is null.
    fn slot_of(&self, row: usize) -> Option<usize> {
        if let Some(present) = &self.present {
            if !present.test(row) {
                return None;
            }
            if !self.is_vector() {
                return Some(self.slot_prefix()[row] as usize);
            }
        }
        Some(row)
    }

    fn slot_range(&self, start: usize, end: usize) -> std::ops::Range<usize> {
        if self.present.is_none() || self.is_vector() {
            return start..end;
        }
        let prefix = self.slot_prefix();
        prefix[start] as usize..prefix[end] as usize
    }

    fn byte_range(&self, slots: std::ops::Range<usize>) -> std::ops::Range<usize> {
        match self.kind.width() {
            Some(width) => slots.start * width..slots.end * width,
            None => self.offsets[slots.start] as usize..self.offsets[slots.end] as usize,
        }
    }

    fn check_row(&self, row: usize) -> StorageResult<()> {
        if row >= self.rows {
            return Err(TracedStorageError::invalid(format!(
                "row {} out of range of {} rows",
                row, self.rows
            )));
        }
        Ok(())
    }

    /// All stored values.
    pub fn buffer(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Bytes of the value at `row`, `None` for a null.
    pub fn get_buffer(&self, row: usize) -> StorageResult<Option<&[u8]>> {
        self.check_row(row)?;
        Ok(self
            .slot_of(row)
            .map(|slot| &self.data.as_slice()[self.byte_range(slot..slot + 1)]))
    }

    /// Bytes of all stored values of rows `start..start + len`.
    pub fn get_range_buffer(&self, start: usize, len: usize) -> StorageResult<&[u8]> {
        if start + len > self.rows {
            return Err(TracedStorageError::invalid(format!(
                "range {}..{} out of range of {} rows",
                start,
                start + len,
                self.rows
            )));
        }
        let range = self.byte_range(self.slot_range(start, start + len));
        Ok(&self.data.as_slice()[range])
    }

    pub fn get_value(&self, row: usize) -> StorageResult<DataValue> {
        match self.get_buffer(row)? {
            Some(bytes) => decode_value(self.type_kind, bytes),
            None => Ok(DataValue::Null),
        }
    }

    fn length_encoding(&self) -> ColumnEncodingOption {
        match self.encoding.kind {
            ColumnEncodingKind::CompressZstd | ColumnEncodingKind::CompressZlib => self.encoding,
            _ => ColumnEncodingOption::none(),
        }
    }

    /// Encode the column into its streams.
    pub fn encode(&self) -> StorageResult<EncodedColumn> {
        let present = match &self.present {
            Some(present) if self.has_null() => Some(EncodedStream {
                bytes: present.to_bytes(self.rows),
                rows: self.rows,
            }),
            _ => None,
        };

        // an all-null group stores no values, not even vector placeholders
        let all_null = self.all_null();
        let length_encoding = self.length_encoding();
        let (length, length_origin) = if self.kind == PaxColumnKind::VarLen && all_null {
            (Some(EncodedStream { bytes: vec![], rows: 0 }), 0)
        } else if self.kind == PaxColumnKind::VarLen {
            let mut raw = vec![];
            let rows = if self.is_vector() {
                for offset in &self.offsets {
                    raw.put_u32_le(*offset);
                }
                self.offsets.len()
            } else {
                for pair in self.offsets.windows(2) {
                    raw.put_u32_le(pair[1] - pair[0]);
                }
                self.offsets.len() - 1
            };
            let bytes = encode_stream(&raw, length_encoding, std::mem::size_of::<u32>())?;
            (Some(EncodedStream { bytes, rows }), raw.len())
        } else {
            (None, 0)
        };

        let width = self.kind.width().unwrap_or(1);
        let data = if all_null {
            EncodedStream { bytes: vec![], rows: 0 }
        } else {
            EncodedStream {
                bytes: encode_stream(self.data.as_slice(), self.encoding, width)?,
                rows: self.slots(),
            }
        };
        let origin_length = if all_null { 0 } else { self.origin_length() };

        Ok(EncodedColumn {
            present,
            length,
            data,
            encoding: ColumnEncoding {
                kind: self.encoding.kind as i32,
                compress_level: self.encoding.compress_level,
                length: origin_length as i64,
                length_stream_kind: length_encoding.kind as i32,
                length_stream_compress_level: length_encoding.compress_level,
                length_stream_length: length_origin as i64,
            },
        })
    }

    /// Rebuild a column of `rows` rows from its streams.
    pub fn decode(
        type_kind: DataTypeKind,
        format: StorageFormat,
        rows: usize,
        present: Option<&[u8]>,
        length: Option<&[u8]>,
        data: &[u8],
        encoding: &ColumnEncoding,
    ) -> StorageResult<Self> {
        let kind = PaxColumnKind::for_type(type_kind)?;
        let encoding_kind = ColumnEncodingKind::try_from(encoding.kind).map_err(|_| {
            TracedStorageError::invalid_format(format!("unknown encoding {}", encoding.kind))
        })?;
        let length_kind =
            ColumnEncodingKind::try_from(encoding.length_stream_kind).map_err(|_| {
                TracedStorageError::invalid_format(format!(
                    "unknown encoding {}",
                    encoding.length_stream_kind
                ))
            })?;
        let to_len = |len: i64| {
            usize::try_from(len).map_err(|_| {
                TracedStorageError::invalid_format(format!("negative stream length {}", len))
            })
        };

        let present = match present {
            Some(bytes) => {
                if bytes.len() < Bitmap8::minimal_stored_bytes(rows) {
                    return Err(TracedStorageError::invalid_format(format!(
                        "present stream of {} bytes for {} rows",
                        bytes.len(),
                        rows
                    )));
                }
                let mut bitmap = Bitmap8::from_bytes(bytes);
                bitmap.truncate(rows);
                Some(bitmap)
            }
            None => None,
        };
        let non_null_rows = present.as_ref().map_or(rows, |p| p.count_ones());
        let slots = if format == StorageFormat::OrcVector {
            rows
        } else {
            non_null_rows
        };

        let width = kind.width().unwrap_or(1);
        if rows > 0 && non_null_rows == 0 && data.is_empty() {
            return Ok(Self::all_null_placeholders(
                type_kind,
                kind,
                format,
                ColumnEncodingOption::new(encoding_kind, encoding.compress_level),
                present,
                rows,
            ));
        }
        let values = decode_stream(data, encoding_kind, width, to_len(encoding.length)?)?;

        let offsets = match kind {
            PaxColumnKind::VarLen => {
                let length = length.ok_or_else(|| {
                    TracedStorageError::invalid_format("variable-length column without length stream")
                })?;
                let raw = decode_stream(
                    length,
                    length_kind,
                    std::mem::size_of::<u32>(),
                    to_len(encoding.length_stream_length)?,
                )?;
                let mut buf = &raw[..];
                let mut entries = Vec::with_capacity(raw.len() / 4);
                while buf.remaining() >= 4 {
                    entries.push(buf.get_u32_le());
                }
                let offsets = if format == StorageFormat::OrcVector {
                    entries
                } else {
                    let mut offsets = Vec::with_capacity(entries.len() + 1);
                    let mut total = 0u32;
                    offsets.push(0);
                    for len in entries {
                        total = total.checked_add(len).ok_or_else(|| {
                            TracedStorageError::invalid_format("length stream overflow")
                        })?;
                        offsets.push(total);
                    }
                    offsets
                };
                let valid = offsets.len() == slots + 1
                    && offsets.first() == Some(&0)
                    && offsets.windows(2).all(|w| w[0] <= w[1])
                    && offsets.last().map(|o| *o as usize) == Some(values.len());
                if !valid {
                    return Err(TracedStorageError::invalid_format(format!(
                        "length stream does not describe {} values of {} bytes",
                        slots,
                        values.len()
                    )));
                }
                offsets
            }
            _ => {
                if values.len() != slots * width {
                    return Err(TracedStorageError::invalid_format(format!(
                        "data stream of {} bytes for {} values of {} bytes",
                        values.len(),
                        slots,
                        width
                    )));
                }
                vec![]
            }
        };

        Ok(Self {
            type_kind,
            kind,
            format,
            encoding: ColumnEncodingOption::new(encoding_kind, encoding.compress_level),
            data: DataBuffer::from_vec(values),
            offsets,
            present,
            rows,
            non_null_rows,
            slot_prefix: OnceLock::new(),
        })
    }

    /// Column of `rows` nulls whose values were not stored. The vector layout
    /// gets its zeroed slots back.
    fn all_null_placeholders(
        type_kind: DataTypeKind,
        kind: PaxColumnKind,
        format: StorageFormat,
        encoding: ColumnEncodingOption,
        present: Option<Bitmap8>,
        rows: usize,
    ) -> Self {
        let slots = if format == StorageFormat::OrcVector {
            rows
        } else {
            0
        };
        let (values, offsets) = match kind.width() {
            Some(width) => (vec![0u8; slots * width], vec![]),
            None => (vec![], vec![0u32; slots + 1]),
        };
        Self {
            type_kind,
            kind,
            format,
            encoding,
            data: DataBuffer::from_vec(values),
            offsets,
            present,
            rows,
            non_null_rows: 0,
            slot_prefix: OnceLock::new(),
        }
    }
}
