// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use ordered_float::OrderedFloat;
use parse_display::Display;
use rust_decimal::Decimal;

use super::DataTypeKind;

pub type F64 = OrderedFloat<f64>;

/// A single column value of a tuple.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataValue {
    // NOTE: Null comes first.
    #[display("null")]
    Null,
    #[display("{0}")]
    Bool(bool),
    #[display("{0}")]
    Int16(i16),
    #[display("{0}")]
    Int32(i32),
    #[display("{0}")]
    Int64(i64),
    #[display("{0}")]
    Float64(F64),
    #[display("{0}")]
    Decimal(Decimal),
    #[display("'{0}'")]
    String(String),
    #[display("{0:?}")]
    Blob(Vec<u8>),
}

impl DataValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Type of the value, `None` for null.
    pub fn kind(&self) -> Option<DataTypeKind> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(_) => DataTypeKind::Bool,
            Self::Int16(_) => DataTypeKind::Int16,
            Self::Int32(_) => DataTypeKind::Int32,
            Self::Int64(_) => DataTypeKind::Int64,
            Self::Float64(_) => DataTypeKind::Float64,
            Self::Decimal(_) => DataTypeKind::Decimal,
            Self::String(_) => DataTypeKind::String,
            Self::Blob(_) => DataTypeKind::Blob,
        })
    }

    /// Whether the value may be stored in a column of `kind`.
    pub fn matches(&self, kind: DataTypeKind) -> bool {
        self.kind().map_or(true, |k| k == kind)
    }

    /// Convert to a value of `kind` without loss. Integers convert between
    /// widths when the value fits. `None` when no such value exists.
    pub fn cast_to(&self, kind: DataTypeKind) -> Option<DataValue> {
        if self.matches(kind) {
            return Some(self.clone());
        }
        let v = match self {
            Self::Int16(v) => *v as i64,
            Self::Int32(v) => *v as i64,
            Self::Int64(v) => *v,
            _ => return None,
        };
        match kind {
            DataTypeKind::Int16 => i16::try_from(v).ok().map(Self::Int16),
            DataTypeKind::Int32 => i32::try_from(v).ok().map(Self::Int32),
            DataTypeKind::Int64 => Some(Self::Int64(v)),
            _ => None,
        }
    }
}

impl From<i16> for DataValue {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        Self::Float64(OrderedFloat(v))
    }
}

impl From<Decimal> for DataValue {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<DataValue>> From<Option<T>> for DataValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_first() {
        assert!(DataValue::Null < DataValue::Int32(i32::MIN));
        assert!(DataValue::Int32(1) < DataValue::Int32(2));
        assert_eq!(DataValue::from(None::<i32>), DataValue::Null);
        assert_eq!(DataValue::from("a").to_string(), "'a'");
    }

    #[test]
    fn value_kind() {
        assert_eq!(DataValue::Null.kind(), None);
        assert!(DataValue::Null.matches(DataTypeKind::Blob));
        assert!(!DataValue::Int16(1).matches(DataTypeKind::Int32));
    }

    #[test]
    fn integer_casts() {
        assert_eq!(
            DataValue::Int32(100).cast_to(DataTypeKind::Int64),
            Some(DataValue::Int64(100))
        );
        assert_eq!(
            DataValue::Int64(-7).cast_to(DataTypeKind::Int16),
            Some(DataValue::Int16(-7))
        );
        assert_eq!(DataValue::Int64(1 << 40).cast_to(DataTypeKind::Int32), None);
        assert_eq!(DataValue::Null.cast_to(DataTypeKind::Int16), Some(DataValue::Null));
        assert_eq!(DataValue::from("1").cast_to(DataTypeKind::Int64), None);
        assert_eq!(DataValue::Int32(1).cast_to(DataTypeKind::Float64), None);
    }
}
