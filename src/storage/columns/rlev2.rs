// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! ORC RLEv2 for integer streams.
//!
//! A stream is a sequence of runs, each starting with a header whose top two
//! bits select the sub-encoding:
//!
//! ```plain
//! short repeat: | 00 | width-1 (3) | count-3 (3) | value (width bytes, big endian) |
//! direct:       | 01 | width (5) | len-1 (9) | len zigzag values bit-packed |
//! delta:        | 11 | width (5) | len-1 (9) | base (varint) | delta base (varint) |
//!               | len-2 deltas bit-packed, width 0 for a fixed delta |
//! ```
//!
//! Signed values are zigzag encoded, bit-packed values are written MSB first.
//! Patched-base runs are not produced and are rejected on read.

use crate::storage::{StorageResult, TracedStorageError};

const MIN_REPEAT: usize = 3;
const MAX_SHORT_REPEAT: usize = 10;
const MAX_LITERAL: usize = 512;

const SHORT_REPEAT: u8 = 0;
const DIRECT: u8 = 1;
const DELTA: u8 = 3;

fn corrupted(what: impl std::fmt::Display) -> TracedStorageError {
    TracedStorageError::invalid_format(format!("corrupted RLEv2 stream: {}", what))
}

const fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

const fn unzigzag(v: u64) -> i64 {
    (v >> 1) as i64 ^ -((v & 1) as i64)
}

/// Bits needed to store `v`, at least one.
fn bits_of(v: u64) -> u32 {
    (64 - v.leading_zeros()).max(1)
}

/// Round up to a width the 5-bit width code can express.
fn closest_width(bits: u32) -> u32 {
    match bits {
        0..=24 => bits.max(1),
        25..=26 => 26,
        27..=28 => 28,
        29..=30 => 30,
        31..=32 => 32,
        33..=40 => 40,
        41..=48 => 48,
        49..=56 => 56,
        _ => 64,
    }
}

fn encode_width(width: u32) -> u8 {
    match width {
        1..=24 => (width - 1) as u8,
        26 => 24,
        28 => 25,
        30 => 26,
        32 => 27,
        40 => 28,
        48 => 29,
        56 => 30,
        _ => 31,
    }
}

fn decode_width(code: u8) -> u32 {
    match code {
        0..=23 => code as u32 + 1,
        24 => 26,
        25 => 28,
        26 => 30,
        27 => 32,
        28 => 40,
        29 => 48,
        30 => 56,
        _ => 64,
    }
}

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push(0x80 | (v & 0x7f) as u8);
        v >>= 7;
    }
    out.push(v as u8);
}

fn varint_len(v: u64) -> usize {
    (bits_of(v) as usize).div_ceil(7)
}

fn write_packed(out: &mut Vec<u8>, values: impl IntoIterator<Item = u64>, width: u32) {
    let mut acc = 0u128;
    let mut bits = 0u32;
    for v in values {
        acc = (acc << width) | v as u128;
        bits += width;
        while bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
        acc &= (1u128 << bits) - 1;
    }
    if bits > 0 {
        out.push((acc << (8 - bits)) as u8);
    }
}

fn packed_len(count: usize, width: u32) -> usize {
    (count * width as usize).div_ceil(8)
}

/// Builds an RLEv2 stream out of signed integers.
#[derive(Default)]
pub struct RleV2Encoder {
    values: Vec<i64>,
}

impl RleV2Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, value: i64) {
        self.values.push(value);
    }

    pub fn finish(self) -> Vec<u8> {
        let values = self.values;
        let mut out = Vec::with_capacity(values.len());
        let mut i = 0;
        while i < values.len() {
            let run = repeat_len(&values[i..]);
            if run >= MIN_REPEAT {
                if run <= MAX_SHORT_REPEAT {
                    write_short_repeat(&mut out, values[i], run);
                } else {
                    write_delta(&mut out, &values[i..i + run], 0, 0);
                }
                i += run;
                continue;
            }
            // literals up to the next repeat
            let mut end = i + 1;
            while end < values.len()
                && end - i < MAX_LITERAL
                && repeat_len(&values[end..]) < MIN_REPEAT
            {
                end += 1;
            }
            write_literals(&mut out, &values[i..end]);
            i = end;
        }
        out
    }
}

/// Length of the run of equal values at the start of `values`.
fn repeat_len(values: &[i64]) -> usize {
    let first = values[0];
    values
        .iter()
        .take(MAX_LITERAL)
        .take_while(|v| **v == first)
        .count()
}

fn write_short_repeat(out: &mut Vec<u8>, value: i64, count: usize) {
    let zz = zigzag(value);
    let bytes = (bits_of(zz) as usize).div_ceil(8);
    out.push((SHORT_REPEAT << 6) | (((bytes - 1) as u8) << 3) | (count - MIN_REPEAT) as u8);
    out.extend_from_slice(&zz.to_be_bytes()[8 - bytes..]);
}

fn write_run_header(out: &mut Vec<u8>, kind: u8, width_code: u8, len: usize) {
    let len = len - 1;
    out.push((kind << 6) | (width_code << 1) | ((len >> 8) & 1) as u8);
    out.push(len as u8);
}

/// Deltas after the delta base are packed as absolute values of `width`
/// bits. A width of 0 writes a fixed-delta run.
fn write_delta(out: &mut Vec<u8>, values: &[i64], width: u32, delta_base: i64) {
    let code = if width == 0 { 0 } else { encode_width(width) };
    write_run_header(out, DELTA, code, values.len());
    write_varint(out, zigzag(values[0]));
    write_varint(out, zigzag(delta_base));
    if width > 0 {
        let deltas = values[1..]
            .windows(2)
            .map(|w| w[1].wrapping_sub(w[0]).unsigned_abs());
        write_packed(out, deltas, width);
    }
}

/// Delta base and packed width of a monotonic run, `None` if the deltas
/// change sign or overflow.
fn delta_params(values: &[i64]) -> Option<(i64, u32)> {
    let delta_base = values[1].checked_sub(values[0])?;
    let mut fixed = true;
    let mut max = 0u64;
    for w in values[1..].windows(2) {
        let delta = w[1].checked_sub(w[0])?;
        if (delta_base >= 0 && delta < 0) || (delta_base < 0 && delta > 0) {
            return None;
        }
        fixed &= delta == delta_base;
        max = max.max(delta.unsigned_abs());
    }
    if fixed {
        return Some((delta_base, 0));
    }
    // width 1 shares its code with the fixed delta
    Some((delta_base, closest_width(bits_of(max)).max(2)))
}

fn write_literals(out: &mut Vec<u8>, values: &[i64]) {
    let width = closest_width(
        values
            .iter()
            .map(|v| bits_of(zigzag(*v)))
            .max()
            .unwrap_or(1),
    );
    let direct_cost = 2 + packed_len(values.len(), width);
    if values.len() >= 2 {
        if let Some((delta_base, delta_width)) = delta_params(values) {
            let delta_cost = 2
                + varint_len(zigzag(values[0]))
                + varint_len(zigzag(delta_base))
                + packed_len(values.len() - 2, delta_width);
            if delta_cost < direct_cost {
                write_delta(out, values, delta_width, delta_base);
                return;
            }
        }
    }
    write_run_header(out, DIRECT, encode_width(width), values.len());
    write_packed(out, values.iter().map(|v| zigzag(*v)), width);
}

/// Reads the runs of an RLEv2 stream.
struct RunReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RunReader<'a> {
    fn byte(&mut self) -> StorageResult<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| corrupted("unexpected end"))?;
        self.pos += 1;
        Ok(b)
    }

    fn varint(&mut self) -> StorageResult<u64> {
        let mut v = 0u64;
        for shift in (0..64).step_by(7) {
            let b = self.byte()?;
            v |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
        }
        Err(corrupted("varint too long"))
    }

    fn packed(&mut self, count: usize, width: u32, mut f: impl FnMut(u64)) -> StorageResult<()> {
        let len = packed_len(count, width);
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| corrupted("truncated bit-packed values"))?;
        self.pos += len;
        let mask = if width == 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        let (mut acc, mut bits, mut bytes) = (0u128, 0u32, bytes.iter());
        for _ in 0..count {
            while bits < width {
                let Some(b) = bytes.next() else {
                    return Err(corrupted("truncated bit-packed values"));
                };
                acc = (acc << 8) | *b as u128;
                bits += 8;
            }
            bits -= width;
            f((acc >> bits) as u64 & mask);
            acc &= (1u128 << bits) - 1;
        }
        Ok(())
    }
}

/// Decode a whole stream, failing if it holds more than `max_values` values.
pub fn decode(data: &[u8], max_values: usize) -> StorageResult<Vec<i64>> {
    let mut reader = RunReader { data, pos: 0 };
    let mut values = Vec::with_capacity(max_values.min(data.len() * 8));
    while reader.pos < data.len() {
        let header = reader.byte()?;
        let kind = header >> 6;
        if kind == SHORT_REPEAT {
            let bytes = ((header >> 3) & 0x07) as usize + 1;
            let count = (header & 0x07) as usize + MIN_REPEAT;
            let mut zz = 0u64;
            for _ in 0..bytes {
                zz = (zz << 8) | reader.byte()? as u64;
            }
            check_room(&values, count, max_values)?;
            values.extend(std::iter::repeat(unzigzag(zz)).take(count));
            continue;
        }
        let code = (header >> 1) & 0x1f;
        let len = ((((header & 1) as usize) << 8) | reader.byte()? as usize) + 1;
        check_room(&values, len, max_values)?;
        match kind {
            DIRECT => reader.packed(len, decode_width(code), |v| values.push(unzigzag(v)))?,
            DELTA => {
                let base = unzigzag(reader.varint()?);
                let delta_base = unzigzag(reader.varint()?);
                values.push(base);
                if len == 1 {
                    continue;
                }
                let mut last = base.wrapping_add(delta_base);
                values.push(last);
                if code == 0 {
                    for _ in 2..len {
                        last = last.wrapping_add(delta_base);
                        values.push(last);
                    }
                } else {
                    let negative = delta_base < 0;
                    reader.packed(len - 2, decode_width(code), |delta| {
                        last = if negative {
                            last.wrapping_sub(delta as i64)
                        } else {
                            last.wrapping_add(delta as i64)
                        };
                        values.push(last);
                    })?;
                }
            }
            _ => return Err(corrupted(format!("unsupported run kind {}", kind))),
        }
    }
    Ok(values)
}

fn check_room(values: &[i64], more: usize, max_values: usize) -> StorageResult<()> {
    if values.len() + more > max_values {
        return Err(corrupted(format!(
            "more than {} values in the stream",
            max_values
        )));
    }
    Ok(())
}
