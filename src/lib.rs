// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! PAX: a columnar micro-partition storage engine.
//!
//! A table is stored as a sequence of micro-partition files. Each file holds a
//! number of row groups, each group holds one set of encoded streams per column,
//! and a footer at the tail of the file describes the schema, the groups and the
//! per-column statistics.

#![feature(error_generic_member_access)]
#![deny(unused_must_use)]

pub mod storage;
pub mod types;
