// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Relation-level access: a relation is a directory of micro-partition files
//! named by their block id, described by a catalog of
//! [`MicroPartitionMetadata`](super::MicroPartitionMetadata).

mod catalog;
mod deleter;
mod partition_writer;
mod reader;
mod writer;

pub use self::catalog::*;
pub use self::deleter::*;
pub use self::partition_writer::*;
pub use self::reader::*;
pub use self::writer::*;

use std::path::{Path, PathBuf};

use super::file::{FileSystem, FileSystemOptions};
use super::{ErrorKind, StorageResult};

/// Path of the micro-partition `block_id` in relation directory `dir`.
pub fn micro_partition_path(dir: &Path, block_id: u32) -> PathBuf {
    dir.join(block_id.to_string())
}

/// Create the relation directory. Object stores have no directories.
pub(crate) fn ensure_directory(
    fs: &dyn FileSystem,
    dir: &Path,
    options: Option<&FileSystemOptions>,
) -> StorageResult<()> {
    match fs.create_directory(dir, options) {
        Err(e) if e.kind() == ErrorKind::UnImplements => Ok(()),
        other => other,
    }
}
