// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;
use std::sync::Arc;

pub use super::proto::{ColumnEncodingKind, StorageFormat};
use super::file::FileSystemOptions;
use super::{Bitmap8, PaxFilter, SharedBuffer, StorageResult, TracedStorageError};
use crate::types::{DataTypeKind, TupleDesc};

/// Default zstd level of variable-length columns.
pub const DEFAULT_ZSTD_LEVEL: i32 = 5;
pub const DEFAULT_GROUP_LIMIT: usize = 16384;
pub const DEFAULT_SPLIT_TUPLES: usize = 163840;
pub const DEFAULT_SPLIT_SIZE: usize = 64 * (1 << 20); // 64MB
pub const DEFAULT_VISIMAP_CACHE_CAPACITY: usize = 16;

/// Encoding of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnEncodingOption {
    pub kind: ColumnEncodingKind,
    pub compress_level: i32,
}

impl Default for ColumnEncodingOption {
    fn default() -> Self {
        Self {
            kind: ColumnEncodingKind::DefEncoded,
            compress_level: 0,
        }
    }
}

impl ColumnEncodingOption {
    pub const fn new(kind: ColumnEncodingKind, compress_level: i32) -> Self {
        Self {
            kind,
            compress_level,
        }
    }

    pub const fn none() -> Self {
        Self::new(ColumnEncodingKind::NoEncoded, 0)
    }

    /// Replace [`ColumnEncodingKind::DefEncoded`] with the concrete encoding of
    /// `kind` and reject encodings the column type cannot use.
    pub fn resolve(self, kind: DataTypeKind) -> StorageResult<Self> {
        match self.kind {
            ColumnEncodingKind::DefEncoded if kind.is_integer() => {
                Ok(Self::new(ColumnEncodingKind::RleV2, 0))
            }
            ColumnEncodingKind::DefEncoded if kind.is_varlen() => Ok(Self::new(
                ColumnEncodingKind::CompressZstd,
                DEFAULT_ZSTD_LEVEL,
            )),
            ColumnEncodingKind::DefEncoded => Ok(Self::none()),
            ColumnEncodingKind::RleV2 if kind.is_varlen() || kind == DataTypeKind::Decimal => {
                Err(TracedStorageError::logic(format!(
                    "run-length encoding is not supported on {} columns",
                    kind
                )))
            }
            _ => Ok(self),
        }
    }
}

/// Options of the storage engine.
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// Directory holding the micro-partition files of a relation
    pub path: PathBuf,

    /// Soft limit of rows per group
    pub group_limit: usize,

    /// Split a micro-partition after this many tuples
    pub split_tuple_numbers: usize,

    /// Split a micro-partition after this many bytes
    pub split_file_size: usize,

    /// Encoding used for columns without an explicit option
    pub default_encoding: ColumnEncodingOption,

    pub storage_format: StorageFormat,

    /// Number of visibility maps kept in memory
    pub visimap_cache_capacity: usize,

    /// Log filter statistics when a scan ends
    pub log_filter_stats: bool,

    /// Tablespace of a remote file system
    pub fs_options: Option<FileSystemOptions>,
}

impl StorageOptions {
    pub fn default_for_cli() -> Self {
        Self {
            path: PathBuf::new().join("pax.db"),
            group_limit: DEFAULT_GROUP_LIMIT,
            split_tuple_numbers: DEFAULT_SPLIT_TUPLES,
            split_file_size: DEFAULT_SPLIT_SIZE,
            default_encoding: ColumnEncodingOption::default(),
            storage_format: StorageFormat::OrcRowGroup,
            visimap_cache_capacity: DEFAULT_VISIMAP_CACHE_CAPACITY,
            log_filter_stats: false,
            fs_options: None,
        }
    }

    pub fn default_for_test(path: PathBuf) -> Self {
        Self {
            path,
            group_limit: 100,
            split_tuple_numbers: 1000,
            split_file_size: 1 << 20, // 1MB
            default_encoding: ColumnEncodingOption::none(),
            storage_format: StorageFormat::OrcRowGroup,
            visimap_cache_capacity: 4,
            log_filter_stats: true,
            fs_options: None,
        }
    }
}

/// Options of one micro-partition writer.
#[derive(Clone, Debug)]
pub struct WriterOptions {
    pub file_name: PathBuf,
    pub block_id: u32,
    pub desc: Arc<TupleDesc>,
    /// Per-column encodings; missing entries use [`ColumnEncodingOption::default`].
    pub encoding_opts: Vec<ColumnEncodingOption>,
    pub storage_format: StorageFormat,
    pub group_limit: usize,
    pub fs_options: Option<FileSystemOptions>,
}

impl WriterOptions {
    pub fn new(file_name: impl Into<PathBuf>, block_id: u32, desc: Arc<TupleDesc>) -> Self {
        Self {
            file_name: file_name.into(),
            block_id,
            desc,
            encoding_opts: vec![],
            storage_format: StorageFormat::OrcRowGroup,
            group_limit: DEFAULT_GROUP_LIMIT,
            fs_options: None,
        }
    }

    pub fn from_storage_options(
        options: &StorageOptions,
        file_name: impl Into<PathBuf>,
        block_id: u32,
        desc: Arc<TupleDesc>,
    ) -> Self {
        let encoding_opts = vec![options.default_encoding; desc.natts()];
        Self {
            file_name: file_name.into(),
            block_id,
            desc,
            encoding_opts,
            storage_format: options.storage_format,
            group_limit: options.group_limit,
            fs_options: options.fs_options.clone(),
        }
    }

    /// Resolved encoding of every column.
    pub fn resolved_encodings(&self) -> StorageResult<Vec<ColumnEncodingOption>> {
        self.desc
            .kinds()
            .enumerate()
            .map(|(i, kind)| {
                self.encoding_opts
                    .get(i)
                    .copied()
                    .unwrap_or_default()
                    .resolve(kind)
            })
            .collect()
    }
}

/// Options of one micro-partition reader.
#[derive(Clone, Default)]
pub struct ReaderOptions {
    pub block_id: u32,
    /// Scratch buffer for group reads, reused across readers.
    pub reused_buffer: Option<SharedBuffer>,
    pub filter: Option<Arc<PaxFilter>>,
    /// Deleted rows of the file, a set bit hides the row.
    pub visibility_bitmap: Option<Arc<Bitmap8>>,
    /// Schema expected by the caller; defaults to the file schema.
    pub target_desc: Option<Arc<TupleDesc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErrorKind;

    #[test]
    fn resolve_encodings() {
        let def = ColumnEncodingOption::default();
        assert_eq!(
            def.resolve(DataTypeKind::Int64).unwrap().kind,
            ColumnEncodingKind::RleV2
        );
        assert_eq!(
            def.resolve(DataTypeKind::String).unwrap(),
            ColumnEncodingOption::new(ColumnEncodingKind::CompressZstd, DEFAULT_ZSTD_LEVEL)
        );
        assert_eq!(
            def.resolve(DataTypeKind::Float64).unwrap(),
            ColumnEncodingOption::none()
        );
        let rle = ColumnEncodingOption::new(ColumnEncodingKind::RleV2, 0);
        assert_eq!(
            rle.resolve(DataTypeKind::Blob).unwrap_err().kind(),
            ErrorKind::Logic
        );
        assert_eq!(
            rle.resolve(DataTypeKind::Decimal).unwrap_err().kind(),
            ErrorKind::Logic
        );
        assert_eq!(rle.resolve(DataTypeKind::Float64).unwrap(), rle);
    }
}
