// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Stream encodings.
//!
//! RLEv2 works on little-endian signed integers of 1, 2, 4 or 8 bytes, see
//! [`super::rlev2`]. The compressions work on any bytes.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::rlev2::{self, RleV2Encoder};
use crate::storage::{
    ColumnEncodingKind, ColumnEncodingOption, StorageResult, TracedStorageError,
};

/// Largest stream a group may hold once decoded.
pub const MAX_DECODED_STREAM_SIZE: usize = 1 << 30;

fn integer_width(width: usize) -> Option<usize> {
    matches!(width, 1 | 2 | 4 | 8).then_some(width)
}

fn read_integer(bytes: &[u8]) -> i64 {
    match *bytes {
        [b] => b as i8 as i64,
        [b0, b1] => i16::from_le_bytes([b0, b1]) as i64,
        [b0, b1, b2, b3] => i32::from_le_bytes([b0, b1, b2, b3]) as i64,
        _ => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            i64::from_le_bytes(buf)
        }
    }
}

/// Encode a stream of `width`-byte values (`width` is 1 for byte streams).
pub fn encode_stream(
    data: &[u8],
    option: ColumnEncodingOption,
    width: usize,
) -> StorageResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(vec![]);
    }
    match option.kind {
        ColumnEncodingKind::NoEncoded => Ok(data.to_vec()),
        ColumnEncodingKind::RleV2 => {
            let width = integer_width(width)
                .filter(|w| data.len() % w == 0)
                .ok_or_else(|| {
                    TracedStorageError::logic(format!(
                        "RLEv2 needs integers of 1, 2, 4 or 8 bytes, got width {}",
                        width
                    ))
                })?;
            let mut encoder = RleV2Encoder::new();
            for value in data.chunks_exact(width) {
                encoder.append(read_integer(value));
            }
            Ok(encoder.finish())
        }
        ColumnEncodingKind::CompressZstd => zstd::bulk::compress(data, option.compress_level)
            .map_err(|e| TracedStorageError::logic(format!("zstd compress: {}", e))),
        ColumnEncodingKind::CompressZlib => {
            let level = option.compress_level.clamp(0, 9) as u32;
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| TracedStorageError::logic(format!("zlib compress: {}", e)))
        }
        ColumnEncodingKind::DefEncoded => Err(TracedStorageError::logic(
            "default encoding must be resolved before encoding a stream",
        )),
    }
}

/// Decode a stream produced by [`encode_stream`]; `origin_len` is the length
/// recorded at encoding time.
pub fn decode_stream(
    data: &[u8],
    kind: ColumnEncodingKind,
    width: usize,
    origin_len: usize,
) -> StorageResult<Vec<u8>> {
    if origin_len > MAX_DECODED_STREAM_SIZE {
        return Err(TracedStorageError::invalid_format(format!(
            "stream of {} bytes once decoded",
            origin_len
        )));
    }
    if data.is_empty() {
        if origin_len != 0 {
            return Err(TracedStorageError::invalid_format(format!(
                "empty stream with origin length {}",
                origin_len
            )));
        }
        return Ok(vec![]);
    }
    let decoded = match kind {
        ColumnEncodingKind::NoEncoded => data.to_vec(),
        ColumnEncodingKind::RleV2 => {
            let width = integer_width(width).ok_or_else(|| {
                TracedStorageError::invalid_format(format!("RLEv2 stream of width {}", width))
            })?;
            let mut decoded = Vec::with_capacity(origin_len);
            for value in rlev2::decode(data, origin_len / width)? {
                decoded.extend_from_slice(&value.to_le_bytes()[..width]);
            }
            decoded
        }
        ColumnEncodingKind::CompressZstd => zstd::bulk::decompress(data, origin_len)
            .map_err(|e| TracedStorageError::invalid_format(format!("zstd decompress: {}", e)))?,
        ColumnEncodingKind::CompressZlib => {
            let mut decoded = Vec::with_capacity(origin_len);
            // one byte more than recorded is enough to notice a mismatch
            ZlibDecoder::new(data)
                .take(origin_len as u64 + 1)
                .read_to_end(&mut decoded)
                .map_err(|e| TracedStorageError::invalid_format(format!("zlib decompress: {}", e)))?;
            decoded
        }
        ColumnEncodingKind::DefEncoded => {
            return Err(TracedStorageError::invalid_format(
                "stream recorded with unresolved default encoding",
            ))
        }
    };
    if decoded.len() != origin_len {
        return Err(TracedStorageError::invalid_format(format!(
            "decoded {} bytes, expected {}",
            decoded.len(),
            origin_len
        )));
    }
    Ok(decoded)
}
