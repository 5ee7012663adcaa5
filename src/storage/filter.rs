// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::{AtomicUsize, Ordering};

use parse_display::Display;
use tracing::info;

use super::stats::ColumnStatsProvider;
use crate::types::{DataValue, TupleDesc};

/// Operator of a [`ScanKey`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    #[display("<")]
    Less,
    #[display("<=")]
    LessEqual,
    #[display("=")]
    Equal,
    #[display(">=")]
    GreaterEqual,
    #[display(">")]
    Greater,
    #[display("IS NULL")]
    IsNull,
    #[display("IS NOT NULL")]
    IsNotNull,
}

/// A `column <op> argument` predicate.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("${column} {strategy} {argument}")]
pub struct ScanKey {
    pub column: usize,
    pub strategy: ScanStrategy,
    /// Ignored by the null tests.
    pub argument: DataValue,
}

impl ScanKey {
    pub fn new(column: usize, strategy: ScanStrategy, argument: impl Into<DataValue>) -> Self {
        Self {
            column,
            strategy,
            argument: argument.into(),
        }
    }

    pub fn is_null(column: usize) -> Self {
        Self::new(column, ScanStrategy::IsNull, DataValue::Null)
    }

    pub fn is_not_null(column: usize) -> Self {
        Self::new(column, ScanStrategy::IsNotNull, DataValue::Null)
    }

    /// Whether a value satisfies the predicate.
    pub fn matches(&self, value: &DataValue) -> bool {
        use ScanStrategy::*;
        match self.strategy {
            IsNull => value.is_null(),
            IsNotNull => !value.is_null(),
            _ if value.is_null() || self.argument.is_null() => false,
            Less => value < &self.argument,
            LessEqual => value <= &self.argument,
            Equal => value == &self.argument,
            GreaterEqual => value >= &self.argument,
            Greater => value > &self.argument,
        }
    }

    /// Whether some value of a column with these statistics may satisfy the
    /// predicate.
    fn may_match(&self, stats: &dyn ColumnStatsProvider, desc: &TupleDesc) -> bool {
        use ScanStrategy::*;
        if self.column >= stats.columns_num() {
            // column added after the data was written
            return true;
        }
        let Some(column) = desc.get(self.column) else {
            return true;
        };
        match self.strategy {
            IsNull => return stats.has_null(self.column) || stats.all_null(self.column),
            IsNotNull => return !stats.all_null(self.column),
            _ => {}
        }
        if self.argument.is_null() || stats.all_null(self.column) {
            return false;
        }
        if !self.argument.matches(column.kind) {
            return true;
        }
        let Ok(Some((min, max))) = stats.min_max(self.column, column.kind) else {
            return true;
        };
        let arg = &self.argument;
        match self.strategy {
            Less => &min < arg,
            LessEqual => &min <= arg,
            Equal => &min <= arg && arg <= &max,
            GreaterEqual => &max >= arg,
            Greater => &max > arg,
            IsNull | IsNotNull => true,
        }
    }
}

/// Granularity a filter decision was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterLevel {
    File,
    Group,
}

/// Pruning counters of a filter.
#[derive(Debug, Default)]
pub struct FilterStatistics {
    pub files_total: AtomicUsize,
    pub files_skipped: AtomicUsize,
    pub groups_total: AtomicUsize,
    pub groups_skipped: AtomicUsize,
}

/// Column projection and statistics-based pruning of a scan.
#[derive(Debug, Default)]
pub struct PaxFilter {
    projection: Option<Vec<bool>>,
    scan_keys: Vec<ScanKey>,
    statistics: FilterStatistics,
}

impl PaxFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the projected columns. A projection selecting every column is the
    /// same as no projection.
    pub fn set_column_projection(&mut self, projection: Vec<bool>) {
        self.projection = if projection.iter().all(|p| *p) {
            None
        } else {
            Some(projection)
        };
    }

    pub fn with_projection(mut self, projection: Vec<bool>) -> Self {
        self.set_column_projection(projection);
        self
    }

    pub fn with_scan_keys(mut self, scan_keys: Vec<ScanKey>) -> Self {
        self.scan_keys = scan_keys;
        self
    }

    pub fn projection(&self) -> Option<&[bool]> {
        self.projection.as_deref()
    }

    /// Columns beyond the projection vector are not projected.
    pub fn is_projected(&self, column: usize) -> bool {
        self.projection
            .as_ref()
            .map_or(true, |p| p.get(column).copied().unwrap_or(false))
    }

    pub fn scan_keys(&self) -> &[ScanKey] {
        &self.scan_keys
    }

    pub fn has_scan_keys(&self) -> bool {
        !self.scan_keys.is_empty()
    }

    /// Whether a file or group with these statistics may hold a matching row.
    pub fn test_scan(
        &self,
        stats: &dyn ColumnStatsProvider,
        desc: &TupleDesc,
        level: FilterLevel,
    ) -> bool {
        let keep = self.scan_keys.iter().all(|key| key.may_match(stats, desc));
        let (total, skipped) = match level {
            FilterLevel::File => (&self.statistics.files_total, &self.statistics.files_skipped),
            FilterLevel::Group => (&self.statistics.groups_total, &self.statistics.groups_skipped),
        };
        total.fetch_add(1, Ordering::Relaxed);
        if !keep {
            skipped.fetch_add(1, Ordering::Relaxed);
        }
        keep
    }

    /// Whether a materialized row satisfies every scan key.
    pub fn test_row(&self, values: &[DataValue]) -> bool {
        self.scan_keys.iter().all(|key| {
            values
                .get(key.column)
                .map_or(true, |value| key.matches(value))
        })
    }

    pub fn statistics(&self) -> &FilterStatistics {
        &self.statistics
    }

    pub fn log_statistics(&self) {
        let s = &self.statistics;
        info!(
            "pax filter: {} of {} files skipped, {} of {} groups skipped",
            s.files_skipped.load(Ordering::Relaxed),
            s.files_total.load(Ordering::Relaxed),
            s.groups_skipped.load(Ordering::Relaxed),
            s.groups_total.load(Ordering::Relaxed),
        );
    }
}
