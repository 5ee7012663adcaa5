// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! The host-facing tuple model: column types, values, tuple descriptors and slots.

use parse_display::Display;
use serde::{Deserialize, Serialize};

mod tuple;
mod value;

pub use self::tuple::*;
pub use self::value::*;

/// Physical type of a column.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataTypeKind {
    Bool,
    Int16,
    Int32,
    Int64,
    Float64,
    Decimal,
    String,
    Blob,
}

impl DataTypeKind {
    /// Width in bytes of a fixed-width type, `None` for variable-length types.
    pub const fn type_len(&self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::Int16 => Some(2),
            Self::Int32 => Some(4),
            Self::Int64 | Self::Float64 => Some(8),
            Self::Decimal => Some(16),
            Self::String | Self::Blob => None,
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_varlen(&self) -> bool {
        matches!(self, Self::String | Self::Blob)
    }
}

/// Description of one column of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
    pub kind: DataTypeKind,
    /// Dropped columns always read back as null.
    pub dropped: bool,
    /// Value substituted for rows of files written before the column was added.
    pub missing: Option<DataValue>,
    pub collation: u32,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, kind: DataTypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            dropped: false,
            missing: None,
            collation: 0,
        }
    }

    pub fn with_missing(mut self, value: DataValue) -> Self {
        self.missing = Some(value);
        self
    }

    pub fn with_collation(mut self, collation: u32) -> Self {
        self.collation = collation;
        self
    }

    pub fn into_dropped(mut self) -> Self {
        self.dropped = true;
        self
    }
}

/// Ordered column list of a relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleDesc {
    columns: Vec<ColumnDesc>,
}

impl TupleDesc {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        Self { columns }
    }

    pub fn natts(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnDesc {
        &self.columns[index]
    }

    pub fn get(&self, index: usize) -> Option<&ColumnDesc> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    pub fn kinds(&self) -> impl Iterator<Item = DataTypeKind> + '_ {
        self.columns.iter().map(|c| c.kind)
    }
}

impl FromIterator<ColumnDesc> for TupleDesc {
    fn from_iter<T: IntoIterator<Item = ColumnDesc>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
