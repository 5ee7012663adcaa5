// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{File, FileHandleRegistry, FileSystem, FileSystemOptions, OpenFlags, SharedHandle};
use crate::storage::{IoOp, StorageResult, TracedStorageError};

/// A regular file on local disk.
pub struct LocalFile {
    path: PathBuf,
    handle: SharedHandle,
    registry: Arc<FileHandleRegistry>,
    registry_id: Option<u64>,
    writable: bool,
}

fn closed_error() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, "file is closed")
}

impl LocalFile {
    fn with_handle<T>(
        &self,
        op: IoOp,
        offset: Option<u64>,
        required: usize,
        f: impl FnOnce(&std::fs::File) -> std::io::Result<T>,
    ) -> StorageResult<T> {
        let guard = self.handle.lock();
        let file = guard
            .as_ref()
            .ok_or_else(|| TracedStorageError::io(op, &self.path, offset, required, 0, closed_error()))?;
        f(file).map_err(|e| TracedStorageError::io(op, &self.path, offset, required, 0, e))
    }
}

#[cfg(unix)]
fn read_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(unix)]
fn write_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn write_at(file: &std::fs::File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}

impl File for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize> {
        let len = buf.len();
        self.with_handle(IoOp::Read, None, len, |mut f| f.read(buf))
    }

    fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        self.with_handle(IoOp::Write, None, buf.len(), |mut f| f.write(buf))
    }

    fn pread(&self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        let len = buf.len();
        self.with_handle(IoOp::PRead, Some(offset), len, |f| read_at(f, buf, offset))
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> StorageResult<usize> {
        self.with_handle(IoOp::PWrite, Some(offset), buf.len(), |f| {
            write_at(f, buf, offset)
        })
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.with_handle(IoOp::Flush, None, 0, |f| f.sync_data())
    }

    fn close(&mut self) -> StorageResult<()> {
        if let Some(id) = self.registry_id.take() {
            self.registry.deregister(id);
        }
        // a handle that was force-closed has nothing left to release
        let Some(file) = self.handle.lock().take() else {
            return Ok(());
        };
        if self.writable {
            file.sync_all()
                .map_err(|e| TracedStorageError::io(IoOp::Close, &self.path, None, 0, 0, e))?;
        }
        Ok(())
    }

    fn file_length(&self) -> StorageResult<u64> {
        self.with_handle(IoOp::Stat, None, 0, |f| f.metadata().map(|m| m.len()))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        if let Some(id) = self.registry_id.take() {
            self.registry.deregister(id);
        }
    }
}

/// File system over local disk. Every opened file is registered in a
/// [`FileHandleRegistry`].
#[derive(Clone)]
pub struct LocalFileSystem {
    registry: Arc<FileHandleRegistry>,
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::with_registry(FileHandleRegistry::global())
    }

    pub fn with_registry(registry: Arc<FileHandleRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<FileHandleRegistry> {
        &self.registry
    }
}

impl FileSystem for LocalFileSystem {
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        _options: Option<&FileSystemOptions>,
    ) -> StorageResult<Box<dyn File>> {
        let mut opts = OpenOptions::new();
        opts.read(flags.readable()).write(flags.writable());
        if flags.contains(OpenFlags::CREATE) {
            if flags.contains(OpenFlags::EXCLUSIVE) {
                opts.create_new(true);
            } else {
                opts.create(true);
            }
        }
        if flags.contains(OpenFlags::TRUNCATE) {
            opts.truncate(true);
        }
        let file = opts
            .open(path)
            .map_err(|e| TracedStorageError::io(IoOp::Open, path, None, 0, 0, e))?;

        let handle = Arc::new(Mutex::new(Some(file)));
        let id = self.registry.register(path, handle.clone());
        Ok(Box::new(LocalFile {
            path: path.to_path_buf(),
            handle,
            registry: self.registry.clone(),
            registry_id: Some(id),
            writable: flags.writable(),
        }))
    }

    fn delete(&self, path: &Path, _options: Option<&FileSystemOptions>) -> StorageResult<()> {
        std::fs::remove_file(path)
            .map_err(|e| TracedStorageError::io(IoOp::Delete, path, None, 0, 0, e))
    }

    fn exists(&self, path: &Path, _options: Option<&FileSystemOptions>) -> StorageResult<bool> {
        Ok(path.exists())
    }

    fn list_directory(
        &self,
        path: &Path,
        _options: Option<&FileSystemOptions>,
    ) -> StorageResult<Vec<String>> {
        let entries = std::fs::read_dir(path).map_err(|e| {
            TracedStorageError::file_operation(format!("list directory {:?}: {}", path, e))
        })?;
        let mut names = vec![];
        for entry in entries {
            let entry = entry.map_err(|e| {
                TracedStorageError::file_operation(format!("list directory {:?}: {}", path, e))
            })?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn create_directory(
        &self,
        path: &Path,
        _options: Option<&FileSystemOptions>,
    ) -> StorageResult<()> {
        std::fs::create_dir_all(path).map_err(|e| {
            TracedStorageError::file_operation(format!("create directory {:?}: {}", path, e))
        })
    }

    fn delete_directory(
        &self,
        path: &Path,
        delete_top_level: bool,
        _options: Option<&FileSystemOptions>,
    ) -> StorageResult<()> {
        let to_err = |e: std::io::Error| {
            TracedStorageError::file_operation(format!("delete directory {:?}: {}", path, e))
        };
        if delete_top_level {
            return std::fs::remove_dir_all(path).map_err(to_err);
        }
        for entry in std::fs::read_dir(path).map_err(to_err)? {
            let entry = entry.map_err(to_err)?;
            let file_type = entry.file_type().map_err(to_err)?;
            if file_type.is_dir() {
                std::fs::remove_dir_all(entry.path()).map_err(to_err)?;
            } else {
                std::fs::remove_file(entry.path()).map_err(to_err)?;
            }
        }
        Ok(())
    }

    fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        _options: Option<&FileSystemOptions>,
    ) -> StorageResult<()> {
        std::fs::copy(src, dst)
            .map(|_| ())
            .map_err(|e| TracedStorageError::file_operation(format!("copy {:?} to {:?}: {}", src, dst, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErrorKind;

    fn fs() -> LocalFileSystem {
        LocalFileSystem::with_registry(Arc::new(FileHandleRegistry::new()))
    }

    #[test]
    fn exact_io() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("data");
        let fs = fs();

        let mut file = fs.open(&path, OpenFlags::WRITE_NEW, None).unwrap();
        file.write_n(b"hello pax").unwrap();
        file.pwrite_n(b"PAX", 6).unwrap();
        file.flush().unwrap();
        file.close().unwrap();

        let mut file = fs.open(&path, OpenFlags::READ, None).unwrap();
        assert_eq!(file.file_length().unwrap(), 9);
        let mut buf = [0u8; 5];
        file.read_n(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        let mut buf = [0u8; 3];
        file.pread_n(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"PAX");

        let mut buf = [0u8; 8];
        let err = file.pread_n(&mut buf, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        let mut buf = [0u8; 5];
        let err = file.read_n(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        file.close().unwrap();
    }

    #[test]
    fn close_syncs_written_data() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("data");
        let registry = Arc::new(FileHandleRegistry::new());
        let fs = LocalFileSystem::with_registry(registry.clone());

        let mut file = fs.open(&path, OpenFlags::WRITE_NEW, None).unwrap();
        file.write_n(b"synced").unwrap();
        file.close().unwrap();
        assert!(registry.is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), b"synced");
        // closing twice is a no-op
        file.close().unwrap();

        let mut file = fs.open(&path, OpenFlags::READ, None).unwrap();
        file.close().unwrap();
        assert_eq!(file.file_length().unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn open_errors() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("data");
        let fs = fs();
        let err = fs.open(&path, OpenFlags::READ, None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Io);

        let mut file = fs.open(&path, OpenFlags::WRITE_NEW, None).unwrap();
        file.close().unwrap();
        let err = fs.open(&path, OpenFlags::WRITE_NEW, None).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn registry_tracks_handles() {
        let tempdir = tempfile::tempdir().unwrap();
        let registry = Arc::new(FileHandleRegistry::new());
        let fs = LocalFileSystem::with_registry(registry.clone());

        let mut a = fs
            .open(&tempdir.path().join("a"), OpenFlags::WRITE_NEW, None)
            .unwrap();
        let mut b = fs
            .open(&tempdir.path().join("b"), OpenFlags::WRITE_NEW, None)
            .unwrap();
        assert_eq!(registry.len(), 2);
        a.close().unwrap();
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.force_close_all(), 1);
        assert!(registry.is_empty());
        assert_eq!(b.write(b"x").unwrap_err().kind(), ErrorKind::Io);
        b.close().unwrap();
    }

    #[test]
    fn directories() {
        let tempdir = tempfile::tempdir().unwrap();
        let fs = fs();
        let dir = tempdir.path().join("rel");
        fs.create_directory(&dir, None).unwrap();
        for name in ["b", "a"] {
            let mut f = fs.open(&dir.join(name), OpenFlags::WRITE_NEW, None).unwrap();
            f.write_n(name.as_bytes()).unwrap();
            f.close().unwrap();
        }
        assert_eq!(fs.list_directory(&dir, None).unwrap(), vec!["a", "b"]);

        fs.copy_file(&dir.join("a"), &dir.join("c"), None).unwrap();
        assert!(fs.exists(&dir.join("c"), None).unwrap());

        fs.delete_directory(&dir, false, None).unwrap();
        assert!(fs.list_directory(&dir, None).unwrap().is_empty());
        fs.delete_directory(&dir, true, None).unwrap();
        assert!(!fs.exists(&dir, None).unwrap());
        assert_eq!(
            fs.list_directory(&dir, None).unwrap_err().kind(),
            ErrorKind::FileOperation
        );
    }
}
