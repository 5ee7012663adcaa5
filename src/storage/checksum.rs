// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use super::{StorageResult, TracedStorageError};

pub fn build_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

pub fn verify_checksum(data: &[u8], checksum: u32) -> StorageResult<()> {
    let found = crc32fast::hash(data);
    if found != checksum {
        return Err(TracedStorageError::checksum(found as u64, checksum as u64));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32() {
        let checksum = build_checksum(b"footer");
        verify_checksum(b"footer", checksum).unwrap();
        assert!(verify_checksum(b"footex", checksum).is_err());
    }
}
