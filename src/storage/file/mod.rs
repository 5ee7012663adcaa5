// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! File system abstraction used by the micro-partition reader and writer.
//!
//! Plain `read`/`write` calls may transfer fewer bytes than requested. The `_n`
//! variants either transfer exactly the requested length or fail with an
//! [`StorageError::Io`](super::StorageError::Io) error carrying both counts.

mod local;
mod registry;
mod remote;

use std::ops::BitOr;
use std::path::Path;

pub use self::local::*;
pub use self::registry::*;
pub use self::remote::*;
use super::{IoOp, StorageResult, TracedStorageError};

/// Open mode of a [`File`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(u8);

impl OpenFlags {
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(1 << 1);
    pub const CREATE: Self = Self(1 << 2);
    /// Fail if the file already exists. Only meaningful with [`OpenFlags::CREATE`].
    pub const EXCLUSIVE: Self = Self(1 << 3);
    pub const TRUNCATE: Self = Self(1 << 4);

    pub const READ_WRITE: Self = Self(Self::READ.0 | Self::WRITE.0);
    /// Create a new file for writing, failing if it exists.
    pub const WRITE_NEW: Self = Self(Self::WRITE.0 | Self::CREATE.0 | Self::EXCLUSIVE.0);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn readable(&self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn writable(&self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Options required by file systems that are not rooted on local disk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileSystemOptions {
    /// Tablespace (bucket) the object lives in.
    pub tablespace: String,
}

/// An open file.
pub trait File: Send {
    /// Sequential read at the current position.
    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize>;

    /// Sequential write at the current position.
    fn write(&mut self, buf: &[u8]) -> StorageResult<usize>;

    /// Positional read. Does not move the current position.
    fn pread(&self, buf: &mut [u8], offset: u64) -> StorageResult<usize>;

    /// Positional write. Does not move the current position.
    fn pwrite(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize>;

    fn flush(&mut self) -> StorageResult<()>;

    /// Close the file. Any later operation fails.
    fn close(&mut self) -> StorageResult<()>;

    fn file_length(&self) -> StorageResult<u64>;

    fn path(&self) -> &Path;

    fn read_n(&mut self, buf: &mut [u8]) -> StorageResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read(&mut buf[done..])?;
            if n == 0 {
                return Err(TracedStorageError::short_io(
                    IoOp::Read,
                    self.path(),
                    None,
                    buf.len(),
                    done,
                ));
            }
            done += n;
        }
        Ok(())
    }

    fn write_n(&mut self, buf: &[u8]) -> StorageResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.write(&buf[done..])?;
            if n == 0 {
                return Err(TracedStorageError::short_io(
                    IoOp::Write,
                    self.path(),
                    None,
                    buf.len(),
                    done,
                ));
            }
            done += n;
        }
        Ok(())
    }

    fn pread_n(&self, buf: &mut [u8], offset: u64) -> StorageResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.pread(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(TracedStorageError::short_io(
                    IoOp::PRead,
                    self.path(),
                    Some(offset),
                    buf.len(),
                    done,
                ));
            }
            done += n;
        }
        Ok(())
    }

    fn pwrite_n(&mut self, buf: &[u8], offset: u64) -> StorageResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.pwrite(&buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(TracedStorageError::short_io(
                    IoOp::PWrite,
                    self.path(),
                    Some(offset),
                    buf.len(),
                    done,
                ));
            }
            done += n;
        }
        Ok(())
    }
}

/// A file system backend.
pub trait FileSystem: Send + Sync {
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        options: Option<&FileSystemOptions>,
    ) -> StorageResult<Box<dyn File>>;

    fn delete(&self, path: &Path, options: Option<&FileSystemOptions>) -> StorageResult<()>;

    fn exists(&self, path: &Path, options: Option<&FileSystemOptions>) -> StorageResult<bool>;

    /// Names of the entries directly under `path`.
    fn list_directory(
        &self,
        path: &Path,
        options: Option<&FileSystemOptions>,
    ) -> StorageResult<Vec<String>>;

    fn create_directory(&self, path: &Path, options: Option<&FileSystemOptions>)
        -> StorageResult<()>;

    /// Remove everything under `path`; the directory itself is removed only when
    /// `delete_top_level` is set.
    fn delete_directory(
        &self,
        path: &Path,
        delete_top_level: bool,
        options: Option<&FileSystemOptions>,
    ) -> StorageResult<()>;

    fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        options: Option<&FileSystemOptions>,
    ) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags() {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE;
        assert!(flags.writable());
        assert!(!flags.readable());
        assert!(OpenFlags::WRITE_NEW.contains(OpenFlags::EXCLUSIVE));
        assert!(OpenFlags::READ_WRITE.contains(OpenFlags::READ));
    }
}
