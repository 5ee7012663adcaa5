// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::warn;

/// An OS file handle shared between its owner and the registry. `None` once closed.
pub type SharedHandle = Arc<Mutex<Option<std::fs::File>>>;

struct RegisteredHandle {
    path: PathBuf,
    handle: SharedHandle,
}

/// Tracks every open local file so that handles leaked by an aborted operation
/// can be closed in bulk.
#[derive(Default)]
pub struct FileHandleRegistry {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, RegisteredHandle>>,
}

impl FileHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<FileHandleRegistry> {
        static GLOBAL: OnceLock<Arc<FileHandleRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    pub fn register(&self, path: &Path, handle: SharedHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(
            id,
            RegisteredHandle {
                path: path.to_path_buf(),
                handle,
            },
        );
        id
    }

    pub fn deregister(&self, id: u64) {
        self.handles.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered handle. Called on abnormal termination; each handle
    /// still open at that point is a leak and is reported. Returns the number of
    /// handles closed.
    pub fn force_close_all(&self) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut closed = 0;
        for (id, registered) in handles {
            if registered.handle.lock().take().is_some() {
                warn!(
                    "leaked file handle {} on {:?} was forcibly closed",
                    id, registered.path
                );
                closed += 1;
            }
        }
        closed
    }
}
