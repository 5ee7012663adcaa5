// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Per-column min/max and null statistics of groups and micro-partitions.

use std::sync::Arc;

use super::encode::{decode_value, encode_value};
use super::proto::{
    ColumnBasicInfo, ColumnDataStats, ColumnStats, MicroPartitionStatisticsInfo, TypeKind,
};
use super::{StorageResult, TracedStorageError};
use crate::types::{DataTypeKind, DataValue, TupleDesc};

/// Serialize a non-null value for min/max persistence.
pub fn to_value(value: &DataValue) -> StorageResult<Vec<u8>> {
    let kind = value
        .kind()
        .ok_or_else(|| TracedStorageError::logic("null has no stats value"))?;
    let mut bytes = vec![];
    encode_value(value, kind, &mut bytes)?;
    Ok(bytes)
}

/// Inverse of [`to_value`].
pub fn from_value(bytes: &[u8], kind: DataTypeKind) -> StorageResult<DataValue> {
    decode_value(kind, bytes)
}

/// Read access to the statistics of a set of columns.
pub trait ColumnStatsProvider {
    fn columns_num(&self) -> usize;

    fn column_stats(&self, column: usize) -> Option<&ColumnStats>;

    fn all_null(&self, column: usize) -> bool {
        self.column_stats(column).map_or(false, |s| s.all_null)
    }

    fn has_null(&self, column: usize) -> bool {
        self.column_stats(column).map_or(true, |s| s.has_null)
    }

    /// Decoded `(min, max)` of a column, if recorded.
    fn min_max(&self, column: usize, kind: DataTypeKind) -> StorageResult<Option<(DataValue, DataValue)>> {
        let Some(data_stats) = self.column_stats(column).and_then(|s| s.data_stats.as_ref()) else {
            return Ok(None);
        };
        match (&data_stats.minimal, &data_stats.maximum) {
            (Some(min), Some(max)) => Ok(Some((from_value(min, kind)?, from_value(max, kind)?))),
            _ => Ok(None),
        }
    }
}

impl ColumnStatsProvider for [ColumnStats] {
    fn columns_num(&self) -> usize {
        self.len()
    }

    fn column_stats(&self, column: usize) -> Option<&ColumnStats> {
        self.get(column)
    }
}

impl ColumnStatsProvider for MicroPartitionStatisticsInfo {
    fn columns_num(&self) -> usize {
        self.columns.len()
    }

    fn column_stats(&self, column: usize) -> Option<&ColumnStats> {
        self.columns.get(column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnState {
    all_null: bool,
    has_null: bool,
    min: Option<DataValue>,
    max: Option<DataValue>,
}

impl Default for ColumnState {
    fn default() -> Self {
        Self {
            all_null: true,
            has_null: false,
            min: None,
            max: None,
        }
    }
}

impl ColumnState {
    fn update(&mut self, value: &DataValue) {
        if value.is_null() {
            self.has_null = true;
            return;
        }
        self.all_null = false;
        if self.min.as_ref().map_or(true, |min| value < min) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().map_or(true, |max| value > max) {
            self.max = Some(value.clone());
        }
    }
}

/// Accumulates statistics while rows are written.
#[derive(Debug, Clone)]
pub struct MicroPartitionStats {
    desc: Arc<TupleDesc>,
    columns: Vec<ColumnState>,
}

impl MicroPartitionStats {
    pub fn new(desc: Arc<TupleDesc>) -> Self {
        let columns = vec![ColumnState::default(); desc.natts()];
        Self { desc, columns }
    }

    pub fn add_row(&mut self, values: &[DataValue]) -> StorageResult<()> {
        if values.len() != self.columns.len() {
            return Err(TracedStorageError::logic(format!(
                "stats of {} columns cannot take a row of {} values",
                self.columns.len(),
                values.len()
            )));
        }
        for ((state, value), column) in self
            .columns
            .iter_mut()
            .zip(values)
            .zip(self.desc.columns())
        {
            if column.dropped {
                state.has_null = true;
                continue;
            }
            state.update(value);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.columns.fill(ColumnState::default());
    }

    pub fn min(&self, column: usize) -> Option<&DataValue> {
        self.columns[column].min.as_ref()
    }

    pub fn max(&self, column: usize) -> Option<&DataValue> {
        self.columns[column].max.as_ref()
    }

    pub fn has_null(&self, column: usize) -> bool {
        self.columns[column].has_null
    }

    pub fn all_null(&self, column: usize) -> bool {
        self.columns[column].all_null
    }

    /// Fold `other`, collected over the same schema, into `self`.
    pub fn merge_from(&mut self, other: &MicroPartitionStats) -> StorageResult<()> {
        if self.columns.len() != other.columns.len() {
            return Err(TracedStorageError::logic(format!(
                "merge stats of {} columns into stats of {} columns",
                other.columns.len(),
                self.columns.len()
            )));
        }
        for (dst, src) in self.columns.iter_mut().zip(&other.columns) {
            dst.all_null &= src.all_null;
            dst.has_null |= src.has_null;
            if let Some(min) = &src.min {
                if dst.min.as_ref().map_or(true, |d| min < d) {
                    dst.min = Some(min.clone());
                }
            }
            if let Some(max) = &src.max {
                if dst.max.as_ref().map_or(true, |d| max > d) {
                    dst.max = Some(max.clone());
                }
            }
        }
        Ok(())
    }

    pub fn serialize(&self) -> StorageResult<MicroPartitionStatisticsInfo> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for (state, column) in self.columns.iter().zip(self.desc.columns()) {
            let data_stats = match (&state.min, &state.max) {
                (Some(min), Some(max)) => Some(ColumnDataStats {
                    minimal: Some(to_value(min)?),
                    maximum: Some(to_value(max)?),
                }),
                _ => None,
            };
            columns.push(ColumnStats {
                all_null: state.all_null,
                has_null: state.has_null,
                info: Some(ColumnBasicInfo {
                    type_kind: TypeKind::from(column.kind) as i32,
                    collation: column.collation,
                }),
                data_stats,
            });
        }
        Ok(MicroPartitionStatisticsInfo { columns })
    }
}

/// Fold the statistics `src` into `dst`.
///
/// Returns `Ok(false)`, leaving `dst` untouched, when a column was recorded
/// under a different collation on each side or under a collation the schema no
/// longer uses: such min/max values cannot be compared.
pub fn statistics_info_combine(
    dst: &mut MicroPartitionStatisticsInfo,
    src: &MicroPartitionStatisticsInfo,
    desc: &TupleDesc,
) -> StorageResult<bool> {
    if dst.columns.len() != src.columns.len() || dst.columns.len() > desc.natts() {
        return Err(TracedStorageError::logic(format!(
            "combine stats of {} columns into stats of {} columns over a schema of {} columns",
            src.columns.len(),
            dst.columns.len(),
            desc.natts()
        )));
    }

    let collation = |stats: &ColumnStats| stats.info.as_ref().map_or(0, |i| i.collation);
    for (i, (left, right)) in dst.columns.iter().zip(&src.columns).enumerate() {
        if collation(left) != collation(right) {
            return Ok(false);
        }
        if collation(left) != 0 && collation(left) != desc.column(i).collation {
            return Ok(false);
        }
    }

    for (i, (left, right)) in dst.columns.iter_mut().zip(&src.columns).enumerate() {
        let kind = desc.column(i).kind;
        left.all_null = left.all_null && right.all_null;
        left.has_null = left.has_null || right.has_null;
        if left.info.is_none() {
            left.info = right.info.clone();
        }

        let Some(right_data) = &right.data_stats else {
            continue;
        };
        let left_data = left.data_stats.get_or_insert_with(ColumnDataStats::default);
        if let Some(right_min) = &right_data.minimal {
            let replace = match &left_data.minimal {
                Some(left_min) => from_value(right_min, kind)? < from_value(left_min, kind)?,
                None => true,
            };
            if replace {
                left_data.minimal = Some(right_min.clone());
            }
        }
        if let Some(right_max) = &right_data.maximum {
            let replace = match &left_data.maximum {
                Some(left_max) => from_value(right_max, kind)? > from_value(left_max, kind)?,
                None => true,
            };
            if replace {
                left_data.maximum = Some(right_max.clone());
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErrorKind;
    use crate::types::ColumnDesc;

    fn desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(vec![
            ColumnDesc::new("a", DataTypeKind::Int32),
            ColumnDesc::new("b", DataTypeKind::String),
        ]))
    }

    fn collect(rows: &[[DataValue; 2]]) -> MicroPartitionStatisticsInfo {
        let mut stats = MicroPartitionStats::new(desc());
        for row in rows {
            stats.add_row(row).unwrap();
        }
        stats.serialize().unwrap()
    }

    #[test]
    fn collect_min_max() {
        let info = collect(&[
            [DataValue::Int32(5), DataValue::from("m")],
            [DataValue::Int32(-3), DataValue::Null],
            [DataValue::Int32(9), DataValue::from("b")],
        ]);
        let (min, max) = info.min_max(0, DataTypeKind::Int32).unwrap().unwrap();
        assert_eq!((min, max), (DataValue::Int32(-3), DataValue::Int32(9)));
        assert!(!info.has_null(0));
        assert!(info.has_null(1));
        assert!(!info.all_null(1));
        let (min, max) = info.min_max(1, DataTypeKind::String).unwrap().unwrap();
        assert_eq!((min, max), (DataValue::from("b"), DataValue::from("m")));
    }

    #[test]
    fn combine_is_monotonic() {
        let mut a = collect(&[
            [DataValue::Int32(10), DataValue::Null],
            [DataValue::Int32(20), DataValue::Null],
        ]);
        let b = collect(&[[DataValue::Int32(-1), DataValue::from("x")]]);
        assert!(statistics_info_combine(&mut a, &b, &desc()).unwrap());

        assert_eq!(
            a.min_max(0, DataTypeKind::Int32).unwrap().unwrap(),
            (DataValue::Int32(-1), DataValue::Int32(20))
        );
        assert!(!a.all_null(1));
        assert!(a.has_null(1));
        assert_eq!(
            a.min_max(1, DataTypeKind::String).unwrap().unwrap(),
            (DataValue::from("x"), DataValue::from("x"))
        );
    }

    #[test]
    fn combine_rejects_mismatch() {
        let mut a = collect(&[[DataValue::Int32(1), DataValue::from("a")]]);
        let mut b = a.clone();
        b.columns.pop();
        let err = statistics_info_combine(&mut a, &b, &desc()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);

        let mut b = a.clone();
        b.columns[1].info.as_mut().unwrap().collation = 100;
        let before = a.clone();
        assert!(!statistics_info_combine(&mut a, &b, &desc()).unwrap());
        assert_eq!(a, before);
    }

    #[test]
    fn merge_accumulators() {
        let mut a = MicroPartitionStats::new(desc());
        a.add_row(&[DataValue::Int32(3), DataValue::Null]).unwrap();
        let mut b = MicroPartitionStats::new(desc());
        b.add_row(&[DataValue::Int32(7), DataValue::from("q")]).unwrap();
        a.merge_from(&b).unwrap();
        assert_eq!(a.min(0), Some(&DataValue::Int32(3)));
        assert_eq!(a.max(0), Some(&DataValue::Int32(7)));
        assert!(a.has_null(1) && !a.all_null(1));
        a.reset();
        assert!(a.all_null(0));
        assert!(a.add_row(&[DataValue::Null]).is_err());
    }
}
