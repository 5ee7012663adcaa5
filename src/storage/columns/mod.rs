// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! In-memory columns of a group and their stream encodings.

mod column;
pub mod encoding;
pub mod rlev2;

pub use self::column::*;
use super::proto::StreamKind;
use super::{ColumnEncodingOption, DataBuffer, StorageFormat, StorageResult, TracedStorageError};
use crate::storage::proto::ColumnEncoding;
use crate::types::{DataValue, TupleDesc};

/// Streams of the vector layout start at multiples of this.
pub const VECTOR_ALIGN_SIZE: usize = 8;

/// The columns of one group, indexed by column position.
///
/// A slot may be empty: a reader only materializes projected columns, and a
/// partial column set can be completed with [`PaxColumns::merge`].
#[derive(Debug, Clone)]
pub struct PaxColumns {
    columns: Vec<Option<PaxColumn>>,
    format: StorageFormat,
    rows: usize,
}

impl PaxColumns {
    pub fn new(format: StorageFormat) -> Self {
        Self {
            columns: vec![],
            format,
            rows: 0,
        }
    }

    /// Empty columns for every column of `desc`.
    pub fn build(
        desc: &TupleDesc,
        encodings: &[ColumnEncodingOption],
        format: StorageFormat,
    ) -> StorageResult<Self> {
        let mut columns = Self::new(format);
        for (i, kind) in desc.kinds().enumerate() {
            let encoding = encodings.get(i).copied().unwrap_or_default();
            columns.append(Some(PaxColumn::new(kind, format, encoding)?));
        }
        Ok(columns)
    }

    pub fn storage_format(&self) -> StorageFormat {
        self.format
    }

    /// Add a column slot.
    pub fn append(&mut self, column: Option<PaxColumn>) {
        if let Some(column) = &column {
            self.rows = self.rows.max(column.rows());
        }
        self.columns.push(column);
    }

    pub fn columns(&self) -> usize {
        self.columns.len()
    }

    pub fn get(&self, index: usize) -> Option<&PaxColumn> {
        self.columns.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PaxColumn> {
        self.columns.get_mut(index).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&PaxColumn>> {
        self.columns.iter().map(Option::as_ref)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn set_rows(&mut self, rows: usize) {
        self.rows = rows;
    }

    pub fn physical_size(&self) -> usize {
        self.columns.iter().flatten().map(PaxColumn::physical_size).sum()
    }

    /// Append one tuple; `values` must cover every column slot.
    pub fn append_tuple(&mut self, values: &[DataValue]) -> StorageResult<()> {
        if values.len() != self.columns.len() {
            return Err(TracedStorageError::logic(format!(
                "tuple of {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(values) {
            let column = column
                .as_mut()
                .ok_or_else(|| TracedStorageError::logic("append to a missing column"))?;
            column.append_value(value)?;
        }
        self.rows += 1;
        Ok(())
    }

    /// Horizontal merge: move every column of `other` into the matching empty
    /// slot of `self`. Both sets must have the same shape and no slot may be
    /// filled on both sides.
    pub fn merge(&mut self, other: PaxColumns) -> StorageResult<()> {
        if self.columns.len() != other.columns.len() {
            return Err(TracedStorageError::logic(format!(
                "merge {} columns into {} columns",
                other.columns.len(),
                self.columns.len()
            )));
        }
        if self.rows != other.rows {
            return Err(TracedStorageError::logic(format!(
                "merge columns of {} rows into columns of {} rows",
                other.rows, self.rows
            )));
        }
        if let Some(index) = self
            .columns
            .iter()
            .zip(&other.columns)
            .position(|(a, b)| a.is_some() && b.is_some())
        {
            return Err(TracedStorageError::logic(format!(
                "column {} is present on both sides of a merge",
                index
            )));
        }
        for (slot, column) in self.columns.iter_mut().zip(other.columns) {
            if column.is_some() {
                *slot = column;
            }
        }
        Ok(())
    }

    fn push_stream(
        &self,
        buffer: &mut DataBuffer<u8>,
        bytes: &[u8],
    ) -> (u64, u32) {
        buffer.extend(bytes);
        let padding = match self.format {
            StorageFormat::OrcVector => {
                (VECTOR_ALIGN_SIZE - buffer.used() % VECTOR_ALIGN_SIZE) % VECTOR_ALIGN_SIZE
            }
            StorageFormat::OrcRowGroup => 0,
        };
        buffer.extend(&[0u8; VECTOR_ALIGN_SIZE][..padding]);
        ((bytes.len() + padding) as u64, padding as u32)
    }

    /// Serialize every present column into one buffer.
    ///
    /// `column_streams` is called once per stream with
    /// `(kind, column index, length, padding, entries)`, `column_encoding` once
    /// per column with its encoding record, both in buffer order.
    pub fn get_data_buffer(
        &self,
        mut column_streams: impl FnMut(StreamKind, usize, u64, u32, u64),
        mut column_encoding: impl FnMut(usize, ColumnEncoding),
    ) -> StorageResult<DataBuffer<u8>> {
        let mut buffer = DataBuffer::new(self.physical_size());
        for (index, column) in self.columns.iter().enumerate() {
            let Some(column) = column else {
                continue;
            };
            if column.rows() != self.rows {
                return Err(TracedStorageError::logic(format!(
                    "column {} has {} rows, expected {}",
                    index,
                    column.rows(),
                    self.rows
                )));
            }
            if column.storage_format() != self.format {
                return Err(TracedStorageError::logic(format!(
                    "column {} uses storage format {:?}, expected {:?}",
                    index,
                    column.storage_format(),
                    self.format
                )));
            }
            let encoded = column.encode()?;
            if let Some(present) = &encoded.present {
                let (length, padding) = self.push_stream(&mut buffer, &present.bytes);
                column_streams(StreamKind::Present, index, length, padding, present.rows as u64);
            }
            if let Some(lengths) = &encoded.length {
                let (length, padding) = self.push_stream(&mut buffer, &lengths.bytes);
                column_streams(StreamKind::Length, index, length, padding, lengths.rows as u64);
            }
            let (length, padding) = self.push_stream(&mut buffer, &encoded.data.bytes);
            column_streams(StreamKind::Data, index, length, padding, encoded.data.rows as u64);
            column_encoding(index, encoded.encoding);
        }
        Ok(buffer)
    }
}
