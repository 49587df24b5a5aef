use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    configuration::Configuration,
    core::{
        context::ExecutionContext,
        error::{Result, ScanError},
    },
};

use super::{
    ColumnAddress, ColumnType, MemorySymbolTable, MemorySymbolTableSource, PageFrame,
    PageFrameSource, RecordMetadata, SymbolTableSource,
};

/// Accumulates little-endian fixed-width values for one column of a partition.
#[derive(Debug, Clone)]
pub struct ColumnBuilder {
    column_type: ColumnType,
    data: Vec<u8>,
    rows: u64,
}

impl ColumnBuilder {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            data: Vec::new(),
            rows: 0,
        }
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        debug_assert_eq!(self.column_type, ColumnType::BOOL);
        self.push_bytes(&[value as u8])
    }

    pub fn push_byte(&mut self, value: i8) -> &mut Self {
        debug_assert_eq!(self.column_type, ColumnType::I8);
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_short(&mut self, value: i16) -> &mut Self {
        debug_assert_eq!(self.column_type, ColumnType::I16);
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_int(&mut self, value: i32) -> &mut Self {
        debug_assert!(matches!(self.column_type, ColumnType::I32 | ColumnType::SYMBOL));
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_long(&mut self, value: i64) -> &mut Self {
        debug_assert!(matches!(self.column_type, ColumnType::I64 | ColumnType::TIMESTAMP));
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_float(&mut self, value: f32) -> &mut Self {
        debug_assert_eq!(self.column_type, ColumnType::F32);
        self.push_bytes(&value.to_le_bytes())
    }

    pub fn push_double(&mut self, value: f64) -> &mut Self {
        debug_assert_eq!(self.column_type, ColumnType::F64);
        self.push_bytes(&value.to_le_bytes())
    }

    /// Stores the key of `value` in `table`, adding it to the table when new.
    pub fn push_symbol(&mut self, table: &mut MemorySymbolTable, value: &str) -> &mut Self {
        let key = table.put(value);
        self.push_int(key)
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn row_count(&self) -> u64 {
        self.rows
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self.rows += 1;
        self
    }
}

struct MemoryPartition {
    row_count: u64,
    columns: Vec<Arc<[u8]>>,
}

/// In-memory partitioned table that hands out page frames of at most
/// `page_frame_max_rows` rows. A partition without rows still yields one empty frame.
pub struct MemoryFrameSource {
    metadata: RecordMetadata,
    partitions: Vec<MemoryPartition>,
    page_frame_max_rows: usize,
    descending: bool,
    random_access: bool,
    symbols: MemorySymbolTableSource,
}

impl MemoryFrameSource {
    pub fn new(metadata: RecordMetadata, configuration: &Configuration) -> Self {
        Self {
            metadata,
            partitions: Vec::new(),
            page_frame_max_rows: configuration.page_frame_max_rows(),
            descending: false,
            random_access: true,
            symbols: MemorySymbolTableSource::new(),
        }
    }

    pub fn with_descending_order(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }

    pub fn with_random_access(mut self, random_access: bool) -> Self {
        self.random_access = random_access;
        self
    }

    pub fn with_symbol_table(mut self, column_index: usize, table: MemorySymbolTable) -> Self {
        self.symbols.insert(column_index, table);
        self
    }

    /// Appends a partition. Columns must follow the metadata order and agree on row count.
    pub fn add_partition(&mut self, columns: Vec<ColumnBuilder>) -> Result<()> {
        if columns.len() != self.metadata.column_count() {
            return Err(ScanError::InvalidArgument(format!(
                "expected {} columns, got {}",
                self.metadata.column_count(),
                columns.len()
            )));
        }

        let row_count = columns.first().map(|c| c.row_count()).unwrap_or(0);

        for (i, column) in columns.iter().enumerate() {
            let expected = self.metadata.column_type(i);
            if column.column_type() != expected {
                return Err(ScanError::InvalidArgument(format!(
                    "column {} ({}) is {}, expected {}",
                    i,
                    self.metadata.column_name(i),
                    column.column_type(),
                    expected
                )));
            }

            if column.row_count() != row_count {
                return Err(ScanError::InvalidArgument(format!(
                    "column {} ({}) has {} rows, expected {}",
                    i,
                    self.metadata.column_name(i),
                    column.row_count(),
                    row_count
                )));
            }
        }

        self.partitions.push(MemoryPartition {
            row_count,
            columns: columns
                .into_iter()
                .map(|c| Arc::<[u8]>::from(c.data))
                .collect(),
        });

        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn row_count(&self) -> u64 {
        self.partitions.iter().map(|p| p.row_count).sum()
    }

    fn frame(&self, partition_index: usize, row_lo: u64, row_count: u64) -> PageFrame {
        let partition = &self.partitions[partition_index];

        let columns = partition
            .columns
            .iter()
            .enumerate()
            .map(|(i, memory)| {
                let size = self.metadata.column_type(i).size();
                ColumnAddress::new(
                    Arc::clone(memory),
                    row_lo as usize * size,
                    row_count as usize * size,
                )
            })
            .collect::<SmallVec<[ColumnAddress; 8]>>();

        PageFrame {
            partition_index,
            partition_row_lo: row_lo,
            row_count,
            columns,
        }
    }
}

impl PageFrameSource for MemoryFrameSource {
    fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    fn open_frames(&self, _context: &ExecutionContext) -> Result<Vec<PageFrame>> {
        let max_rows = self.page_frame_max_rows as u64;
        let mut frames = Vec::new();

        for (partition_index, partition) in self.partitions.iter().enumerate() {
            if partition.row_count == 0 {
                frames.push(self.frame(partition_index, 0, 0));
                continue;
            }

            let mut row_lo = 0;
            while row_lo < partition.row_count {
                let row_hi = (row_lo + max_rows).min(partition.row_count);
                frames.push(self.frame(partition_index, row_lo, row_hi - row_lo));
                row_lo = row_hi;
            }
        }

        log::trace!(
            "opened frames [partitions={}, frames={}, descending={}]",
            self.partitions.len(),
            frames.len(),
            self.descending
        );

        Ok(frames)
    }

    fn symbol_table_source(&self) -> Arc<dyn SymbolTableSource> {
        Arc::new(self.symbols.clone())
    }

    fn has_descending_order(&self) -> bool {
        self.descending
    }

    fn supports_random_access(&self) -> bool {
        self.random_access
    }
}
