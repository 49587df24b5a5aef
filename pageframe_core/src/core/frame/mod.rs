use std::{fmt::Display, sync::Arc};

use smallvec::SmallVec;

use super::{context::ExecutionContext, error::Result};

pub mod memory;
pub mod symbol;

pub use symbol::{MemorySymbolTable, MemorySymbolTableSource, SymbolTable, SymbolTableSource};

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ColumnType {
    BOOL,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    // i32 key into the column's symbol table
    SYMBOL,
    // i64 microseconds
    TIMESTAMP,
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("{:?}", self))
    }
}

impl ColumnType {
    /// Width in bytes of one value in column memory.
    #[inline(always)]
    pub fn size(&self) -> usize {
        match self {
            ColumnType::BOOL | ColumnType::I8 => 1,
            ColumnType::I16 => 2,
            ColumnType::I32 | ColumnType::F32 | ColumnType::SYMBOL => 4,
            ColumnType::I64 | ColumnType::F64 | ColumnType::TIMESTAMP => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnMetadata {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMetadata {
    columns: Vec<ColumnMetadata>,
    timestamp_index: Option<usize>,
}

impl RecordMetadata {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        let timestamp_index = columns
            .iter()
            .position(|c| c.column_type == ColumnType::TIMESTAMP);

        Self {
            columns,
            timestamp_index,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_type(&self, column_index: usize) -> ColumnType {
        self.columns[column_index].column_type
    }

    pub fn column_name(&self, column_index: usize) -> &str {
        &self.columns[column_index].name
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Index of the designated timestamp column, the first TIMESTAMP column.
    pub fn timestamp_index(&self) -> Option<usize> {
        self.timestamp_index
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }
}

/// Zero-copy window into a column buffer owned by the storage layer.
#[derive(Debug, Clone)]
pub struct ColumnAddress {
    memory: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl ColumnAddress {
    pub fn new(memory: Arc<[u8]>, offset: usize, len: usize) -> Self {
        debug_assert!(offset + len <= memory.len());
        Self { memory, offset, len }
    }

    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        &self.memory[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A contiguous run of rows from one partition.
#[derive(Debug, Clone)]
pub struct PageFrame {
    pub partition_index: usize,
    // First partition row covered by this frame
    pub partition_row_lo: u64,
    pub row_count: u64,
    pub columns: SmallVec<[ColumnAddress; 8]>,
}

/// Supplier of page frames for a scan. Frames are returned in natural table order;
/// their position in that list is the frame index encoded into row ids. A source
/// with `has_descending_order` is scanned from its last frame to its first.
pub trait PageFrameSource: Send + Sync {
    fn metadata(&self) -> &RecordMetadata;

    fn open_frames(&self, context: &ExecutionContext) -> Result<Vec<PageFrame>>;

    fn symbol_table_source(&self) -> Arc<dyn SymbolTableSource>;

    fn has_descending_order(&self) -> bool {
        false
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    fn uses_compiled_filter(&self) -> bool {
        false
    }

    /// Releases whatever the source keeps open between executions.
    fn close(&self) {}
}

#[derive(Debug, Clone)]
struct FrameAddresses {
    partition_index: usize,
    partition_row_lo: u64,
    row_count: u64,
    columns: SmallVec<[ColumnAddress; 8]>,
}

/// Column addresses of every frame in one scan, resolved once at dispatch and
/// shared read-only with the workers.
#[derive(Debug, Default)]
pub struct PageAddressCache {
    column_types: Vec<ColumnType>,
    frames: Vec<FrameAddresses>,
}

impl PageAddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(&mut self, metadata: &RecordMetadata) {
        self.clear();
        self.column_types
            .extend(metadata.columns().iter().map(|c| c.column_type));
    }

    pub fn add_frame(&mut self, frame: PageFrame) {
        debug_assert_eq!(frame.columns.len(), self.column_types.len());

        self.frames.push(FrameAddresses {
            partition_index: frame.partition_index,
            partition_row_lo: frame.partition_row_lo,
            row_count: frame.row_count,
            columns: frame.columns,
        });
    }

    pub fn clear(&mut self) {
        self.column_types.clear();
        self.frames.clear();
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }

    pub fn column_type(&self, column_index: usize) -> ColumnType {
        self.column_types[column_index]
    }

    pub fn row_count(&self, frame_index: usize) -> u64 {
        self.frames[frame_index].row_count
    }

    pub fn partition_index(&self, frame_index: usize) -> usize {
        self.frames[frame_index].partition_index
    }

    pub fn partition_row_lo(&self, frame_index: usize) -> u64 {
        self.frames[frame_index].partition_row_lo
    }

    #[inline(always)]
    pub fn column(&self, frame_index: usize, column_index: usize) -> &[u8] {
        self.frames[frame_index].columns[column_index].bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn metadata() -> RecordMetadata {
        RecordMetadata::new(vec![
            ColumnMetadata::new("id", ColumnType::I64),
            ColumnMetadata::new("ts", ColumnType::TIMESTAMP),
        ])
    }

    #[test]
    fn test_metadata_lookup() {
        let metadata = metadata();
        assert_eq!(metadata.column_count(), 2);
        assert_eq!(metadata.column_index("ts"), Some(1));
        assert_eq!(metadata.column_index("missing"), None);
        assert_eq!(metadata.timestamp_index(), Some(1));
        assert_eq!(metadata.column_type(0), ColumnType::I64);
    }

    #[test]
    fn test_address_cache_windows_shared_memory() {
        let memory: Arc<[u8]> = Arc::from((0u8..32).collect::<Vec<u8>>());

        let mut cache = PageAddressCache::new();
        cache.of(&metadata());
        cache.add_frame(PageFrame {
            partition_index: 0,
            partition_row_lo: 2,
            row_count: 1,
            columns: smallvec![
                ColumnAddress::new(Arc::clone(&memory), 16, 8),
                ColumnAddress::new(Arc::clone(&memory), 24, 8),
            ],
        });

        assert_eq!(cache.frame_count(), 1);
        assert_eq!(cache.row_count(0), 1);
        assert_eq!(cache.partition_row_lo(0), 2);
        assert_eq!(cache.column(0, 0), &[16, 17, 18, 19, 20, 21, 22, 23]);

        cache.clear();
        assert_eq!(cache.frame_count(), 0);
        assert_eq!(cache.column_count(), 0);
    }
}
