// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use crate::storage::proto::{ColumnStats, StripeInformation};
use crate::storage::stats::ColumnStatsProvider;
use crate::storage::{PaxColumn, PaxColumns, StorageResult};
use crate::types::DataValue;

/// A decoded group of a micro-partition.
///
/// Only projected columns are materialized. Groups are shared between the
/// cursors of one reader and must not outlive the reader's file.
#[derive(Debug)]
pub struct PaxGroup {
    index: usize,
    row_offset: usize,
    columns: PaxColumns,
}

impl PaxGroup {
    pub fn new(index: usize, row_offset: usize, columns: PaxColumns) -> Self {
        Self {
            index,
            row_offset,
            columns,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Row index in the file of the first row of the group.
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    pub fn rows(&self) -> usize {
        self.columns.rows()
    }

    pub fn columns(&self) -> &PaxColumns {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&PaxColumn> {
        self.columns.get(index)
    }

    /// Value of `column` at `row` of the group. Columns that were not
    /// decoded read as null.
    pub fn get_value(&self, column: usize, row: usize) -> StorageResult<DataValue> {
        match self.columns.get(column) {
            Some(column) => column.get_value(row),
            None => Ok(DataValue::Null),
        }
    }
}

/// Statistics of a single group, as recorded in the file footer.
#[derive(Debug, Clone, Copy)]
pub struct GroupStatsInfo<'a> {
    stripe: &'a StripeInformation,
}

impl<'a> GroupStatsInfo<'a> {
    pub fn new(stripe: &'a StripeInformation) -> Self {
        Self { stripe }
    }

    pub fn number_of_rows(&self) -> u64 {
        self.stripe.number_of_rows
    }

    pub fn col_stats(&self) -> &'a [ColumnStats] {
        &self.stripe.col_stats
    }
}

impl ColumnStatsProvider for GroupStatsInfo<'_> {
    fn columns_num(&self) -> usize {
        self.stripe.col_stats.len()
    }

    fn column_stats(&self, column: usize) -> Option<&ColumnStats> {
        self.stripe.col_stats.get(column)
    }
}
