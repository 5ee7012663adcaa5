// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::backtrace::Backtrace;
use std::path::PathBuf;

use thiserror::Error;

/// I/O primitive that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, parse_display::Display)]
#[display(style = "lowercase")]
pub enum IoOp {
    Open,
    Read,
    Write,
    PRead,
    PWrite,
    Flush,
    Close,
    Delete,
    Stat,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(
        "IO error: {op} {path:?} failed (offset={offset:?}, required={required}, actual={actual}): {source}"
    )]
    Io {
        op: IoOp,
        path: PathBuf,
        offset: Option<u64>,
        required: usize,
        actual: usize,
        source: std::io::Error,
    },
    #[error("file operation error: {0}")]
    FileOperation(String),
    #[error("invalid ORC format: {0}")]
    InvalidOrcFormat(String),
    #[error("logic error: {0}")]
    Logic(String),
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("unimplemented: {0}")]
    UnImplements(String),
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("invalid checksum: found {0}, expected {1}")]
    Checksum(u64, u64),
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),
    #[error("prost encode error: {0}")]
    ProstEncode(prost::EncodeError),
    #[error("prost decode error: {0}")]
    ProstDecode(prost::DecodeError),
}

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    FileOperation,
    InvalidOrcFormat,
    Logic,
    Invalid,
    UnImplements,
    NotFound,
    Corrupted,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::FileOperation(_) => ErrorKind::FileOperation,
            Self::InvalidOrcFormat(_) => ErrorKind::InvalidOrcFormat,
            Self::Logic(_) => ErrorKind::Logic,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::UnImplements(_) => ErrorKind::UnImplements,
            Self::NotFound(..) => ErrorKind::NotFound,
            Self::Checksum(..)
            | Self::JsonDecode(_)
            | Self::ProstEncode(_)
            | Self::ProstDecode(_) => ErrorKind::Corrupted,
        }
    }
}

impl From<serde_json::Error> for TracedStorageError {
    #[inline]
    fn from(e: serde_json::Error) -> TracedStorageError {
        StorageError::JsonDecode(e).into()
    }
}

impl From<prost::EncodeError> for TracedStorageError {
    #[inline]
    fn from(e: prost::EncodeError) -> TracedStorageError {
        StorageError::ProstEncode(e).into()
    }
}

impl From<prost::DecodeError> for TracedStorageError {
    #[inline]
    fn from(e: prost::DecodeError) -> TracedStorageError {
        StorageError::ProstDecode(e).into()
    }
}

/// [`StorageResult`] with backtrace.
#[derive(Error)]
#[error("{source:?}\n{backtrace}")]
pub struct TracedStorageError {
    #[from]
    source: StorageError,
    backtrace: Backtrace,
}

impl std::fmt::Debug for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl TracedStorageError {
    pub fn inner(&self) -> &StorageError {
        &self.source
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    pub fn io(
        op: IoOp,
        path: impl Into<PathBuf>,
        offset: Option<u64>,
        required: usize,
        actual: usize,
        source: std::io::Error,
    ) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            offset,
            required,
            actual,
            source,
        }
        .into()
    }

    /// An exact-length transfer that moved fewer bytes than required.
    pub fn short_io(
        op: IoOp,
        path: impl Into<PathBuf>,
        offset: Option<u64>,
        required: usize,
        actual: usize,
    ) -> Self {
        Self::io(
            op,
            path,
            offset,
            required,
            actual,
            std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
        )
    }

    pub fn file_operation(message: impl ToString) -> Self {
        StorageError::FileOperation(message.to_string()).into()
    }

    pub fn invalid_format(message: impl ToString) -> Self {
        StorageError::InvalidOrcFormat(message.to_string()).into()
    }

    pub fn logic(message: impl ToString) -> Self {
        StorageError::Logic(message.to_string()).into()
    }

    pub fn invalid(message: impl ToString) -> Self {
        StorageError::Invalid(message.to_string()).into()
    }

    pub fn unimplemented(message: impl ToString) -> Self {
        StorageError::UnImplements(message.to_string()).into()
    }

    pub fn not_found(ty: &'static str, item: impl ToString) -> Self {
        StorageError::NotFound(ty, item.to_string()).into()
    }

    pub fn checksum(found: u64, expected: u64) -> Self {
        StorageError::Checksum(found, expected).into()
    }
}

pub type StorageResult<T> = std::result::Result<T, TracedStorageError>;
