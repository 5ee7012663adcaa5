// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Protobuf messages of the micro-partition file format.
//!
//! ```plain
//! | group 0 streams | group 0 footer | ... | group N streams | group N footer |
//! | file footer | postscript | postscript length (u64 LE) |
//! ```

/// Physical type of a column in the file schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TypeKind {
    Boolean = 0,
    Short = 2,
    Int = 3,
    Long = 4,
    Double = 6,
    String = 7,
    Binary = 8,
    Struct = 12,
    Decimal = 14,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Type {
    #[prost(enumeration = "TypeKind", tag = "1")]
    pub kind: i32,
    #[prost(uint32, repeated, tag = "2")]
    pub subtypes: Vec<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StreamKind {
    /// Null bitmap, a set bit marks a non-null row.
    Present = 0,
    Data = 1,
    /// Per-value lengths (row-group layout) or row offsets (vector layout).
    Length = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Stream {
    #[prost(enumeration = "StreamKind", tag = "1")]
    pub kind: i32,
    #[prost(uint32, tag = "2")]
    pub column: u32,
    /// Bytes on disk, padding included.
    #[prost(uint64, tag = "3")]
    pub length: u64,
    /// Trailing zero bytes appended to align the next stream.
    #[prost(uint32, tag = "4")]
    pub padding: u32,
    /// Number of entries described by the stream.
    #[prost(uint64, tag = "5")]
    pub rows: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ColumnEncodingKind {
    /// Resolved to a concrete kind per column type before writing.
    DefEncoded = -1,
    NoEncoded = 0,
    RleV2 = 1,
    CompressZstd = 3,
    CompressZlib = 4,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ColumnEncoding {
    #[prost(enumeration = "ColumnEncodingKind", tag = "1")]
    pub kind: i32,
    #[prost(int32, tag = "2")]
    pub compress_level: i32,
    /// Length of the data stream before encoding.
    #[prost(int64, tag = "3")]
    pub length: i64,
    #[prost(enumeration = "ColumnEncodingKind", tag = "4")]
    pub length_stream_kind: i32,
    #[prost(int32, tag = "5")]
    pub length_stream_compress_level: i32,
    #[prost(int64, tag = "6")]
    pub length_stream_length: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StripeFooter {
    #[prost(message, repeated, tag = "1")]
    pub streams: Vec<Stream>,
    #[prost(message, repeated, tag = "2")]
    pub column_encodings: Vec<ColumnEncoding>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ColumnDataStats {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub minimal: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub maximum: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ColumnBasicInfo {
    #[prost(enumeration = "TypeKind", tag = "1")]
    pub type_kind: i32,
    #[prost(uint32, tag = "2")]
    pub collation: u32,
}

/// Statistics of one column, over a group or over a whole file.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ColumnStats {
    #[prost(bool, tag = "1")]
    pub all_null: bool,
    #[prost(bool, tag = "2")]
    pub has_null: bool,
    #[prost(message, optional, tag = "3")]
    pub info: Option<ColumnBasicInfo>,
    #[prost(message, optional, tag = "4")]
    pub data_stats: Option<ColumnDataStats>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MicroPartitionStatisticsInfo {
    #[prost(message, repeated, tag = "1")]
    pub columns: Vec<ColumnStats>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StripeInformation {
    #[prost(uint64, tag = "1")]
    pub offset: u64,
    /// Bytes of all streams of the group.
    #[prost(uint64, tag = "2")]
    pub data_length: u64,
    /// Bytes of the streams plus the stripe footer.
    #[prost(uint64, tag = "3")]
    pub footer_length: u64,
    #[prost(uint64, tag = "4")]
    pub number_of_rows: u64,
    #[prost(message, repeated, tag = "5")]
    pub col_stats: Vec<ColumnStats>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StorageFormat {
    /// Row-group layout: only non-null values are stored.
    OrcRowGroup = 0,
    /// Batch layout: aligned streams with a slot for every row.
    OrcVector = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Footer {
    #[prost(uint64, tag = "1")]
    pub content_length: u64,
    #[prost(uint64, tag = "2")]
    pub number_of_rows: u64,
    #[prost(message, repeated, tag = "3")]
    pub types: Vec<Type>,
    #[prost(message, repeated, tag = "4")]
    pub stripes: Vec<StripeInformation>,
    #[prost(message, optional, tag = "5")]
    pub statistics: Option<MicroPartitionStatisticsInfo>,
    #[prost(enumeration = "StorageFormat", tag = "6")]
    pub storage_format: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PostScript {
    #[prost(uint64, tag = "1")]
    pub footer_length: u64,
    #[prost(uint32, tag = "2")]
    pub major_version: u32,
    #[prost(uint32, tag = "3")]
    pub minor_version: u32,
    #[prost(uint32, tag = "4")]
    pub writer: u32,
    /// crc32 of the serialized footer.
    #[prost(uint32, tag = "5")]
    pub footer_checksum: u32,
    #[prost(string, tag = "8000")]
    pub magic: String,
}

impl From<crate::types::DataTypeKind> for TypeKind {
    fn from(kind: crate::types::DataTypeKind) -> Self {
        use crate::types::DataTypeKind::*;
        match kind {
            Bool => Self::Boolean,
            Int16 => Self::Short,
            Int32 => Self::Int,
            Int64 => Self::Long,
            Float64 => Self::Double,
            Decimal => Self::Decimal,
            String => Self::String,
            Blob => Self::Binary,
        }
    }
}

impl TypeKind {
    /// Column type of a non-struct schema type.
    pub fn data_type(&self) -> Option<crate::types::DataTypeKind> {
        use crate::types::DataTypeKind;
        Some(match self {
            Self::Boolean => DataTypeKind::Bool,
            Self::Short => DataTypeKind::Int16,
            Self::Int => DataTypeKind::Int32,
            Self::Long => DataTypeKind::Int64,
            Self::Double => DataTypeKind::Float64,
            Self::Decimal => DataTypeKind::Decimal,
            Self::String => DataTypeKind::String,
            Self::Binary => DataTypeKind::Blob,
            Self::Struct => return None,
        })
    }
}
