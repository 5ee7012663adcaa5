// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};
use ordered_float::OrderedFloat;
use rust_decimal::Decimal;

use super::{StorageResult, TracedStorageError};
use crate::types::{DataTypeKind, DataValue};

/// Encode a primitive value into fixed-width buffer
pub trait PrimitiveFixedWidthEncode: Copy + Clone + 'static + Send + Sync + PartialEq {
    /// Width of each element
    const WIDTH: usize;
    const DEFAULT_VALUE: &'static Self;

    /// Encode current primitive data to the end of an `Vec<u8>`.
    fn encode(&self, buffer: &mut impl BufMut);

    /// Decode a data from a bytes array.
    fn decode(buffer: &mut impl Buf) -> Self;
}

impl PrimitiveFixedWidthEncode for bool {
    const WIDTH: usize = std::mem::size_of::<u8>();
    const DEFAULT_VALUE: &'static bool = &false;

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u8(*self as u8)
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_u8() != 0
    }
}

impl PrimitiveFixedWidthEncode for i16 {
    const WIDTH: usize = std::mem::size_of::<i16>();
    const DEFAULT_VALUE: &'static i16 = &0;

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_i16_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_i16_le()
    }
}

impl PrimitiveFixedWidthEncode for i32 {
    const WIDTH: usize = std::mem::size_of::<i32>();
    const DEFAULT_VALUE: &'static i32 = &0;

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_i32_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_i32_le()
    }
}

impl PrimitiveFixedWidthEncode for i64 {
    const WIDTH: usize = std::mem::size_of::<i64>();
    const DEFAULT_VALUE: &'static i64 = &0;

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_i64_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_i64_le()
    }
}

impl PrimitiveFixedWidthEncode for f64 {
    const WIDTH: usize = std::mem::size_of::<f64>();
    const DEFAULT_VALUE: &'static f64 = &0.0;

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_f64_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_f64_le()
    }
}

impl PrimitiveFixedWidthEncode for Decimal {
    const WIDTH: usize = std::mem::size_of::<Decimal>();
    const DEFAULT_VALUE: &'static Self = &Decimal::from_parts(0, 0, 0, false, 0);

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u128_le(u128::from_le_bytes(self.serialize()))
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        Decimal::deserialize(buffer.get_u128_le().to_le_bytes())
    }
}

/// Append the canonical byte form of a non-null `value` of type `kind`.
///
/// Fixed-width types are written little-endian with their exact width,
/// variable-length types as their raw bytes.
pub fn encode_value(value: &DataValue, kind: DataTypeKind, buffer: &mut Vec<u8>) -> StorageResult<()> {
    match (value, kind) {
        (DataValue::Bool(v), DataTypeKind::Bool) => v.encode(buffer),
        (DataValue::Int16(v), DataTypeKind::Int16) => v.encode(buffer),
        (DataValue::Int32(v), DataTypeKind::Int32) => v.encode(buffer),
        (DataValue::Int64(v), DataTypeKind::Int64) => v.encode(buffer),
        (DataValue::Float64(v), DataTypeKind::Float64) => v.0.encode(buffer),
        (DataValue::Decimal(v), DataTypeKind::Decimal) => v.encode(buffer),
        (DataValue::String(v), DataTypeKind::String) => buffer.put_slice(v.as_bytes()),
        (DataValue::Blob(v), DataTypeKind::Blob) => buffer.put_slice(v),
        _ => {
            return Err(TracedStorageError::logic(format!(
                "cannot store {:?} in a {} column",
                value, kind
            )))
        }
    }
    Ok(())
}

/// Decode the canonical byte form produced by [`encode_value`].
pub fn decode_value(kind: DataTypeKind, mut bytes: &[u8]) -> StorageResult<DataValue> {
    if let Some(width) = kind.type_len() {
        if bytes.len() != width {
            return Err(TracedStorageError::invalid_format(format!(
                "{} value needs {} bytes, found {}",
                kind,
                width,
                bytes.len()
            )));
        }
    }
    let buffer = &mut bytes;
    Ok(match kind {
        DataTypeKind::Bool => DataValue::Bool(bool::decode(buffer)),
        DataTypeKind::Int16 => DataValue::Int16(i16::decode(buffer)),
        DataTypeKind::Int32 => DataValue::Int32(i32::decode(buffer)),
        DataTypeKind::Int64 => DataValue::Int64(i64::decode(buffer)),
        DataTypeKind::Float64 => DataValue::Float64(OrderedFloat(f64::decode(buffer))),
        DataTypeKind::Decimal => DataValue::Decimal(Decimal::decode(buffer)),
        DataTypeKind::String => DataValue::String(
            String::from_utf8(buffer.to_vec())
                .map_err(|e| TracedStorageError::invalid_format(e))?,
        ),
        DataTypeKind::Blob => DataValue::Blob(buffer.to_vec()),
    })
}
