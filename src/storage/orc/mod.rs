// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! The micro-partition file format.
//!
//! ```plain
//! | group 0 streams | group 0 footer | ... | group N streams | group N footer |
//! | footer | postscript | postscript length (u64 LE) |
//! ```
//!
//! A file is discovered from its tail: the last 8 bytes give the postscript
//! length, the postscript gives the footer length and the footer checksum, the
//! footer gives the schema, the group directory and the file statistics.

mod format_reader;
mod group;
mod reader;
mod writer;

pub use self::format_reader::*;
pub use self::group::*;
pub use self::reader::*;
pub use self::writer::*;

pub const PAX_MAGIC: &str = "PAXORC";
pub const PAX_MAJOR_VERSION: u32 = 1;
pub const PAX_MINOR_VERSION: u32 = 0;
pub const PAX_WRITER_ID: u32 = 1;

/// Bytes read from the tail of a file in one call when it is opened.
pub const ORC_TAIL_READ_SIZE: usize = 64 * 1024;

/// Size of the trailing postscript length.
pub const POST_SCRIPT_SIZE_LEN: usize = std::mem::size_of::<u64>();
