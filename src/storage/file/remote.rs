// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use super::{File, FileSystem, FileSystemOptions, OpenFlags};
use crate::storage::{IoOp, StorageResult, TracedStorageError};

type ObjectKey = (String, PathBuf);
type ObjectStore = Arc<RwLock<BTreeMap<ObjectKey, Bytes>>>;

/// An object living in a [`RemoteFileSystem`].
///
/// Objects are immutable once uploaded: a readable file works on the snapshot
/// taken at open time, a writable file stages its content and uploads it on
/// `flush` and `close`.
pub struct RemoteFile {
    key: ObjectKey,
    store: ObjectStore,
    flags: OpenFlags,
    data: Vec<u8>,
    position: usize,
    dirty: bool,
    closed: bool,
}

impl RemoteFile {
    fn check_open(&self, op: IoOp, offset: Option<u64>, required: usize) -> StorageResult<()> {
        if self.closed {
            return Err(TracedStorageError::io(
                op,
                &self.key.1,
                offset,
                required,
                0,
                std::io::Error::new(std::io::ErrorKind::Other, "object is closed"),
            ));
        }
        Ok(())
    }

    fn check_mode(&self, op: IoOp, writing: bool) -> StorageResult<()> {
        let allowed = if writing {
            self.flags.writable()
        } else {
            self.flags.readable()
        };
        if !allowed {
            return Err(TracedStorageError::io(
                op,
                &self.key.1,
                None,
                0,
                0,
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ));
        }
        Ok(())
    }

    fn upload(&mut self) {
        if self.dirty {
            self.store
                .write()
                .insert(self.key.clone(), Bytes::copy_from_slice(&self.data));
            self.dirty = false;
        }
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> usize {
        let end = offset + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
        self.dirty = true;
        buf.len()
    }
}

impl File for RemoteFile {
    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        self.check_open(IoOp::Read, None, buf.len())?;
        self.check_mode(IoOp::Read, false)?;
        let start = self.position.min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        self.check_open(IoOp::Write, None, buf.len())?;
        self.check_mode(IoOp::Write, true)?;
        let n = self.write_at(buf, self.position);
        self.position += n;
        Ok(n)
    }

    fn pread(&self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        self.check_open(IoOp::PRead, Some(offset), buf.len())?;
        self.check_mode(IoOp::PRead, false)?;
        // past the end reads nothing
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        self.check_open(IoOp::PWrite, Some(offset), buf.len())?;
        self.check_mode(IoOp::PWrite, true)?;
        Ok(self.write_at(buf, offset as usize))
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_open(IoOp::Flush, None, 0)?;
        self.upload();
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if !self.closed {
            self.upload();
            self.closed = true;
        }
        Ok(())
    }

    fn file_length(&self) -> StorageResult<u64> {
        self.check_open(IoOp::Stat, None, 0)?;
        Ok(self.data.len() as u64)
    }

    fn path(&self) -> &Path {
        &self.key.1
    }
}

/// An object store addressed by `(tablespace, path)`.
///
/// Every operation needs [`FileSystemOptions`] naming the tablespace. Objects
/// cannot be opened for reading and writing at once, and the store has no
/// directory hierarchy to enumerate.
#[derive(Clone, Default)]
pub struct RemoteFileSystem {
    store: ObjectStore,
}

impl RemoteFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn tablespace(options: Option<&FileSystemOptions>) -> StorageResult<&str> {
        match options {
            Some(options) if !options.tablespace.is_empty() => Ok(&options.tablespace),
            _ => Err(TracedStorageError::invalid(
                "remote file system requires a tablespace option",
            )),
        }
    }

    fn key(path: &Path, options: Option<&FileSystemOptions>) -> StorageResult<ObjectKey> {
        Ok((Self::tablespace(options)?.to_string(), path.to_path_buf()))
    }
}

impl FileSystem for RemoteFileSystem {
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        options: Option<&FileSystemOptions>,
    ) -> StorageResult<Box<dyn File>> {
        let key = Self::key(path, options)?;
        if flags.contains(OpenFlags::READ_WRITE) {
            return Err(TracedStorageError::invalid(format!(
                "remote object {:?} cannot be opened for read and write",
                path
            )));
        }

        let existing = self.store.read().get(&key).cloned();
        let data = match existing {
            Some(_) if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) => {
                return Err(TracedStorageError::io(
                    IoOp::Open,
                    path,
                    None,
                    0,
                    0,
                    std::io::Error::from(std::io::ErrorKind::AlreadyExists),
                ));
            }
            Some(_) if flags.contains(OpenFlags::TRUNCATE) => vec![],
            Some(bytes) => bytes.to_vec(),
            None if flags.contains(OpenFlags::CREATE) => vec![],
            None => {
                return Err(TracedStorageError::io(
                    IoOp::Open,
                    path,
                    None,
                    0,
                    0,
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
        };

        // a freshly created object is visible right away
        let dirty = flags.writable();
        let mut file = RemoteFile {
            key,
            store: self.store.clone(),
            flags,
            data,
            position: 0,
            dirty,
            closed: false,
        };
        file.upload();
        Ok(Box::new(file))
    }

    fn delete(&self, path: &Path, options: Option<&FileSystemOptions>) -> StorageResult<()> {
        let key = Self::key(path, options)?;
        match self.store.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(TracedStorageError::io(
                IoOp::Delete,
                path,
                None,
                0,
                0,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
        }
    }

    fn exists(&self, path: &Path, options: Option<&FileSystemOptions>) -> StorageResult<bool> {
        let key = Self::key(path, options)?;
        Ok(self.store.read().contains_key(&key))
    }

    fn list_directory(
        &self,
        path: &Path,
        _options: Option<&FileSystemOptions>,
    ) -> StorageResult<Vec<String>> {
        Err(TracedStorageError::unimplemented(format!(
            "list directory {:?} on remote file system",
            path
        )))
    }

    fn create_directory(
        &self,
        path: &Path,
        _options: Option<&FileSystemOptions>,
    ) -> StorageResult<()> {
        Err(TracedStorageError::unimplemented(format!(
            "create directory {:?} on remote file system",
            path
        )))
    }

    fn delete_directory(
        &self,
        path: &Path,
        delete_top_level: bool,
        options: Option<&FileSystemOptions>,
    ) -> StorageResult<()> {
        let tablespace = Self::tablespace(options)?;
        let mut store = self.store.write();
        store.retain(|(space, object), _| {
            let inside = space == tablespace
                && object.starts_with(path)
                && (delete_top_level || object != path);
            !inside
        });
        Ok(())
    }

    fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        options: Option<&FileSystemOptions>,
    ) -> StorageResult<()> {
        let src_key = Self::key(src, options)?;
        let dst_key = Self::key(dst, options)?;
        let mut store = self.store.write();
        let data = store.get(&src_key).cloned().ok_or_else(|| {
            TracedStorageError::file_operation(format!("copy {:?}: source not found", src))
        })?;
        store.insert(dst_key, data);
        Ok(())
    }
}
