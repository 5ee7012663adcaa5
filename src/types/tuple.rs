// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use parse_display::Display;

use super::DataValue;

/// Number of row-index bits stored in [`ItemPointer::offset`].
pub const PAX_TUPLE_OFFSET_BITS: u32 = 15;
/// Number of row-index bits stored in the low byte of [`ItemPointer::block_number`].
pub const PAX_BLOCK_ROW_BITS: u32 = 8;
/// Exclusive upper bound of an intra-block offset.
pub const PAX_MAX_OFFSET: u32 = 1 << PAX_TUPLE_OFFSET_BITS;
/// Maximum number of rows a single micro-partition file may hold.
pub const PAX_MAX_TUPLES_PER_FILE: usize = 1 << (PAX_TUPLE_OFFSET_BITS + PAX_BLOCK_ROW_BITS);
/// Maximum block id that still fits into a row pointer.
pub const PAX_MAX_BLOCK_ID: u32 = (1 << (32 - PAX_BLOCK_ROW_BITS)) - 1;

/// Row pointer of a tuple.
///
/// ```plain
/// block_number = | block id (24 bits) | row >> 15 (8 bits) |
/// offset       = row & 0x7fff
/// ```
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("({block_number},{offset})")]
pub struct ItemPointer {
    pub block_number: u32,
    pub offset: u16,
}

impl ItemPointer {
    pub const fn new(block_number: u32, offset: u16) -> Self {
        Self {
            block_number,
            offset,
        }
    }

    /// Build the row pointer of row `row_index` in micro-partition `block_id`.
    pub const fn from_pax(block_id: u32, row_index: u32) -> Self {
        Self {
            block_number: (block_id << PAX_BLOCK_ROW_BITS) | (row_index >> PAX_TUPLE_OFFSET_BITS),
            offset: (row_index & (PAX_MAX_OFFSET - 1)) as u16,
        }
    }

    pub const fn block_id(&self) -> u32 {
        self.block_number >> PAX_BLOCK_ROW_BITS
    }

    pub const fn row_index(&self) -> u32 {
        ((self.block_number & ((1 << PAX_BLOCK_ROW_BITS) - 1)) << PAX_TUPLE_OFFSET_BITS)
            | self.offset as u32
    }
}

/// Column-indexed tuple exchanged with the executor. A null is [`DataValue::Null`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleSlot {
    pub values: Vec<DataValue>,
    pub tid: ItemPointer,
}

impl TupleSlot {
    pub fn new(natts: usize) -> Self {
        Self {
            values: vec![DataValue::Null; natts],
            tid: ItemPointer::default(),
        }
    }

    pub fn from_values(values: Vec<DataValue>) -> Self {
        Self {
            values,
            tid: ItemPointer::default(),
        }
    }

    pub fn natts(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: usize) -> &DataValue {
        &self.values[index]
    }

    pub fn is_null(&self, index: usize) -> bool {
        self.values[index].is_null()
    }

    pub fn set(&mut self, index: usize, value: DataValue) {
        self.values[index] = value;
    }

    /// Reset every column to null, resizing the slot to `natts` columns.
    pub fn clear(&mut self, natts: usize) {
        self.values.clear();
        self.values.resize(natts, DataValue::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pax_item_pointer() {
        let tid = ItemPointer::from_pax(3, 0x7fff);
        assert_eq!(tid.block_number, 3 << 8);
        assert_eq!(tid.offset, 0x7fff);
        assert_eq!(tid.row_index(), 0x7fff);

        let tid = ItemPointer::from_pax(5, 0x8001);
        assert_eq!(tid.block_id(), 5);
        assert_eq!(tid.block_number & 0xff, 1);
        assert_eq!(tid.offset, 1);
        assert_eq!(tid.row_index(), 0x8001);

        let last = (PAX_MAX_TUPLES_PER_FILE - 1) as u32;
        assert_eq!(ItemPointer::from_pax(PAX_MAX_BLOCK_ID, last).row_index(), last);
        assert_eq!(ItemPointer::from_pax(PAX_MAX_BLOCK_ID, last).block_id(), PAX_MAX_BLOCK_ID);
    }
}
