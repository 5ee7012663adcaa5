// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{StorageResult, TracedStorageError};

/// Scratch buffer that can be handed from one reader to the next.
pub type SharedBuffer = Arc<Mutex<DataBuffer<u8>>>;

/// A growable buffer with an explicit write cursor.
///
/// ```plain
/// |<------------ capacity ------------>|
/// |<---- used ---->|<--- available --->|
/// ```
///
/// [`DataBuffer::write`] copies at the cursor without moving it,
/// [`DataBuffer::brush`] moves the cursor forward. The buffer only shrinks on
/// an explicit [`DataBuffer::resize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBuffer<T> {
    data: Vec<T>,
    used: usize,
}

impl<T: Copy + Default> DataBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            used: 0,
        }
    }

    /// Wrap existing data; the whole content counts as used.
    pub fn from_vec(data: Vec<T>) -> Self {
        let used = data.len();
        Self { data, used }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.used
    }

    /// Copy `src` at the cursor. The cursor does not move.
    pub fn write(&mut self, src: &[T]) -> StorageResult<()> {
        if src.len() > self.available() {
            return Err(TracedStorageError::invalid(format!(
                "write {} elements into buffer with {} available",
                src.len(),
                self.available()
            )));
        }
        self.data[self.used..self.used + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Move the cursor forward by `n`.
    pub fn brush(&mut self, n: usize) -> StorageResult<()> {
        if n > self.available() {
            return Err(TracedStorageError::invalid(format!(
                "brush {} elements with {} available",
                n,
                self.available()
            )));
        }
        self.used += n;
        Ok(())
    }

    /// Move the cursor back by `n`.
    pub fn brush_back(&mut self, n: usize) -> StorageResult<()> {
        if n > self.used {
            return Err(TracedStorageError::invalid(format!(
                "brush back {} elements with {} used",
                n, self.used
            )));
        }
        self.used -= n;
        Ok(())
    }

    /// Set the capacity. Shrinking below the used size is rejected.
    pub fn resize(&mut self, capacity: usize) -> StorageResult<()> {
        if capacity < self.used {
            return Err(TracedStorageError::invalid(format!(
                "resize to {} below used size {}",
                capacity, self.used
            )));
        }
        self.data.resize(capacity, T::default());
        Ok(())
    }

    /// Make room for `n` more elements by doubling the capacity until they fit.
    pub fn reserve(&mut self, n: usize) {
        if self.available() >= n {
            return;
        }
        let required = self.used + n;
        let mut capacity = self.capacity().max(1);
        while capacity < required {
            capacity *= 2;
        }
        self.data.resize(capacity, T::default());
    }

    /// Append `src`, growing the buffer if needed.
    pub fn extend(&mut self, src: &[T]) {
        self.reserve(src.len());
        self.data[self.used..self.used + src.len()].copy_from_slice(src);
        self.used += src.len();
    }

    /// The writable region after the cursor, at least `min` elements long.
    pub fn next_slice(&mut self, min: usize) -> &mut [T] {
        self.reserve(min.max(1));
        &mut self.data[self.used..]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data[..self.used]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data[..self.used]
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }

    pub fn into_vec(mut self) -> Vec<T> {
        self.data.truncate(self.used);
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor() {
        let mut buffer = DataBuffer::<u8>::new(4);
        buffer.write(&[1, 2]).unwrap();
        assert_eq!(buffer.used(), 0);
        buffer.brush(2).unwrap();
        assert_eq!(buffer.as_slice(), &[1, 2]);
        assert_eq!(buffer.available(), 2);
        assert!(buffer.write(&[0; 3]).is_err());
        assert!(buffer.brush(3).is_err());
        buffer.brush_back(1).unwrap();
        assert_eq!(buffer.as_slice(), &[1]);
        assert!(buffer.brush_back(2).is_err());
        assert!(buffer.resize(0).is_err());
    }

    #[test]
    fn growth_doubles() {
        let mut buffer = DataBuffer::<u32>::new(3);
        buffer.extend(&[1, 2, 3, 4]);
        assert_eq!(buffer.capacity(), 6);
        buffer.extend(&[5; 10]);
        assert_eq!(buffer.capacity(), 24);
        assert_eq!(buffer.used(), 14);

        let mut buffer = DataBuffer::<u8>::new(0);
        assert_eq!(buffer.next_slice(5).len(), 8);
        assert_eq!(buffer.used(), 0);
    }
}
