// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! PAX micro-partition storage.
//!
//! A relation is a set of micro-partition files. Each file is a sequence of
//! groups, each group holds the encoded streams of every column for a range
//! of rows. The layers, bottom-up:
//!
//! * [`file`]: local and remote file systems with exact-length I/O.
//! * [`columns`]: in-memory columns and their stream encodings.
//! * [`orc`]: the micro-partition file writer and reader.
//! * [`visimap`]: cached deletion bitmaps.
//! * [`table`]: splitting writes into micro-partitions, reading and deleting.
//! * [`scan`]: sequential, bitmap, analyze and sample scans.

mod bitmap;
mod buffer;
mod checksum;
pub mod columns;
mod encode;
mod error;
pub mod file;
mod filter;
mod micro_partition;
mod options;
pub mod orc;
pub mod proto;
pub mod scan;
mod stats;
pub mod table;
pub mod visimap;

pub use self::bitmap::*;
pub use self::buffer::*;
pub use self::checksum::*;
pub use self::columns::{PaxColumn, PaxColumnKind, PaxColumns};
pub use self::encode::*;
pub use self::error::*;
pub use self::filter::*;
pub use self::micro_partition::*;
pub use self::options::*;
pub use self::stats::*;
