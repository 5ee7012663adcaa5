// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::orc::{GroupStatsInfo, PaxGroup};
use super::proto::MicroPartitionStatisticsInfo;
use super::StorageResult;
use crate::types::TupleSlot;

/// What a writer reports once its micro-partition is durable.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSummary {
    pub file_name: PathBuf,
    pub block_id: u32,
    pub num_tuples: u64,
    pub file_size: u64,
    pub stats: MicroPartitionStatisticsInfo,
}

/// Receives the [`WriteSummary`] of a closed micro-partition.
pub type WriteSummaryCallback = Box<dyn FnMut(WriteSummary) + Send>;

/// Writes tuples into one micro-partition file.
pub trait MicroPartitionWriter: Send {
    /// Buffer one tuple and stamp `slot.tid` with its row pointer.
    fn write_tuple(&mut self, slot: &mut TupleSlot) -> StorageResult<()>;

    /// Write the buffered rows out as a group.
    fn flush(&mut self) -> StorageResult<()>;

    /// Flush, write the footer and report the summary.
    fn close(&mut self) -> StorageResult<()>;

    /// Estimated size of the file, never decreasing.
    fn physical_size(&self) -> usize;

    fn num_tuples(&self) -> usize;

    fn set_write_summary_callback(&mut self, callback: WriteSummaryCallback);
}

/// Reads tuples out of one micro-partition file.
pub trait MicroPartitionReader: Send {
    fn close(&mut self) -> StorageResult<()>;

    /// Read the next visible tuple, `false` at the end of the file.
    fn read_tuple(&mut self, slot: &mut TupleSlot) -> StorageResult<bool>;

    /// Read the tuple at `row_index` without moving the sequential cursor.
    /// `false` when the row does not exist or is deleted.
    fn get_tuple(&mut self, slot: &mut TupleSlot, row_index: usize) -> StorageResult<bool>;

    fn group_nums(&self) -> usize;

    fn tuple_count(&self) -> usize;

    /// Decoded columns of one group.
    fn read_group(&mut self, group_index: usize) -> StorageResult<Arc<PaxGroup>>;

    fn get_group_stats_info(&self, group_index: usize) -> StorageResult<GroupStatsInfo<'_>>;
}

/// Catalog entry of a micro-partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroPartitionMetadata {
    pub micro_partition_id: u32,
    /// File name relative to the relation directory.
    pub file_name: String,
    pub tuple_count: u64,
    pub file_size: u64,
    #[serde(with = "stats_bytes", default)]
    pub stats: Option<MicroPartitionStatisticsInfo>,
    /// Deletion bitmap of the micro-partition, relative to the relation directory.
    #[serde(default)]
    pub visimap_name: Option<String>,
}

impl MicroPartitionMetadata {
    pub fn from_summary(summary: &WriteSummary) -> Self {
        Self {
            micro_partition_id: summary.block_id,
            file_name: summary
                .file_name
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            tuple_count: summary.num_tuples,
            file_size: summary.file_size,
            stats: Some(summary.stats.clone()),
            visimap_name: None,
        }
    }
}

/// Statistics are persisted as their protobuf encoding.
mod stats_bytes {
    use prost::Message;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::storage::proto::MicroPartitionStatisticsInfo;

    pub fn serialize<S: Serializer>(
        stats: &Option<MicroPartitionStatisticsInfo>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match stats {
            Some(stats) => serializer.serialize_some(&stats.encode_to_vec()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<MicroPartitionStatisticsInfo>, D::Error> {
        let bytes: Option<Vec<u8>> = Option::deserialize(deserializer)?;
        bytes
            .map(|b| MicroPartitionStatisticsInfo::decode(&b[..]).map_err(D::Error::custom))
            .transpose()
    }
}
