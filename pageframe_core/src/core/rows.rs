/// Packed (frame index, local row) address of a row within one scan.
pub type RowId = u64;

const LOCAL_ROW_BITS: u32 = 44;
const LOCAL_ROW_MASK: u64 = (1 << LOCAL_ROW_BITS) - 1;

/// Largest frame index representable in a row id.
pub const MAX_FRAME_INDEX: usize = (1 << (64 - LOCAL_ROW_BITS)) - 1;

/// Largest local row offset representable in a row id.
pub const MAX_LOCAL_ROW: u64 = LOCAL_ROW_MASK;

/// Frame index lives in the high 20 bits, the local row in the low 44 bits.
/// Values outside those ranges are truncated.
#[inline(always)]
pub fn to_row_id(frame_index: usize, local_row: u64) -> RowId {
    ((frame_index as u64 & MAX_FRAME_INDEX as u64) << LOCAL_ROW_BITS) | (local_row & LOCAL_ROW_MASK)
}

#[inline(always)]
pub fn to_frame_index(row_id: RowId) -> usize {
    (row_id >> LOCAL_ROW_BITS) as usize
}

#[inline(always)]
pub fn to_local_row(row_id: RowId) -> u64 {
    row_id & LOCAL_ROW_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_decodes_to_its_parts() {
        for (frame, row) in [(0, 0), (0, 1), (2, 0), (2, 2), (17, 65_535), (MAX_FRAME_INDEX, MAX_LOCAL_ROW)] {
            let row_id = to_row_id(frame, row);
            assert_eq!(to_frame_index(row_id), frame);
            assert_eq!(to_local_row(row_id), row);
        }
    }

    #[test]
    fn test_row_ids_order_by_frame_then_row() {
        assert!(to_row_id(0, MAX_LOCAL_ROW) < to_row_id(1, 0));
        assert!(to_row_id(3, 4) < to_row_id(3, 5));
    }

    #[test]
    fn test_out_of_range_local_row_is_truncated() {
        let row_id = to_row_id(1, MAX_LOCAL_ROW + 1);
        assert_eq!(to_frame_index(row_id), 1);
        assert_eq!(to_local_row(row_id), 0);
    }
}
