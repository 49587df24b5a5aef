use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use super::{
    frame::{ColumnType, PageAddressCache, SymbolTable, SymbolTableSource},
    rows::{RowId, to_row_id},
};

/// Read access to the columns of one positioned row.
pub trait Record {
    fn get_bool(&self, column_index: usize) -> bool;
    fn get_byte(&self, column_index: usize) -> i8;
    fn get_short(&self, column_index: usize) -> i16;
    fn get_int(&self, column_index: usize) -> i32;
    fn get_long(&self, column_index: usize) -> i64;
    fn get_float(&self, column_index: usize) -> f32;
    fn get_double(&self, column_index: usize) -> f64;
    fn get_timestamp(&self, column_index: usize) -> i64;
    fn get_sym(&self, column_index: usize) -> Option<&str>;
    fn get_row_id(&self) -> RowId;
}

/// Row view positioned by (frame index, row index) over a page address cache.
/// Cloning yields an independently positionable view over the same memory.
#[derive(Clone, Default)]
pub struct PageAddressCacheRecord {
    address_cache: Arc<PageAddressCache>,
    symbol_tables: Arc<[Option<Arc<dyn SymbolTable>>]>,
    frame_index: usize,
    row_index: u64,
}

impl PageAddressCacheRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(&mut self, symbol_source: &dyn SymbolTableSource, address_cache: Arc<PageAddressCache>) {
        self.symbol_tables = (0..address_cache.column_count())
            .map(|i| match address_cache.column_type(i) {
                ColumnType::SYMBOL => symbol_source.symbol_table(i),
                _ => None,
            })
            .collect();
        self.address_cache = address_cache;
        self.frame_index = 0;
        self.row_index = 0;
    }

    #[inline(always)]
    pub fn set_frame_index(&mut self, frame_index: usize) {
        self.frame_index = frame_index;
    }

    #[inline(always)]
    pub fn set_row_index(&mut self, row_index: u64) {
        self.row_index = row_index;
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn row_index(&self) -> u64 {
        self.row_index
    }

    pub fn address_cache(&self) -> &Arc<PageAddressCache> {
        &self.address_cache
    }

    #[inline(always)]
    fn value(&self, column_index: usize, size: usize) -> &[u8] {
        debug_assert_eq!(self.address_cache.column_type(column_index).size(), size);
        let offset = self.row_index as usize * size;
        &self.address_cache.column(self.frame_index, column_index)[offset..offset + size]
    }
}

impl Record for PageAddressCacheRecord {
    fn get_bool(&self, column_index: usize) -> bool {
        self.value(column_index, 1)[0] != 0
    }

    fn get_byte(&self, column_index: usize) -> i8 {
        self.value(column_index, 1)[0] as i8
    }

    fn get_short(&self, column_index: usize) -> i16 {
        LittleEndian::read_i16(self.value(column_index, 2))
    }

    fn get_int(&self, column_index: usize) -> i32 {
        LittleEndian::read_i32(self.value(column_index, 4))
    }

    fn get_long(&self, column_index: usize) -> i64 {
        LittleEndian::read_i64(self.value(column_index, 8))
    }

    fn get_float(&self, column_index: usize) -> f32 {
        LittleEndian::read_f32(self.value(column_index, 4))
    }

    fn get_double(&self, column_index: usize) -> f64 {
        LittleEndian::read_f64(self.value(column_index, 8))
    }

    fn get_timestamp(&self, column_index: usize) -> i64 {
        self.get_long(column_index)
    }

    fn get_sym(&self, column_index: usize) -> Option<&str> {
        let key = self.get_int(column_index);
        self.symbol_tables
            .get(column_index)?
            .as_ref()?
            .value_of(key)
    }

    fn get_row_id(&self) -> RowId {
        to_row_id(self.frame_index, self.row_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::{
        ColumnAddress, ColumnMetadata, MemorySymbolTable, MemorySymbolTableSource, PageFrame,
        RecordMetadata,
    };
    use smallvec::smallvec;

    fn cache_with_symbols() -> (Arc<PageAddressCache>, MemorySymbolTableSource) {
        let metadata = RecordMetadata::new(vec![
            ColumnMetadata::new("price", ColumnType::F64),
            ColumnMetadata::new("venue", ColumnType::SYMBOL),
            ColumnMetadata::new("qty", ColumnType::I16),
        ]);

        let mut venues = MemorySymbolTable::new();
        let lse = venues.put("LSE");
        let nyse = venues.put("NYSE");

        let prices: Vec<u8> = [1.5f64, 2.5].iter().flat_map(|v| v.to_le_bytes()).collect();
        let keys: Vec<u8> = [nyse, lse].iter().flat_map(|v| v.to_le_bytes()).collect();
        let qty: Vec<u8> = [7i16, -3].iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut cache = PageAddressCache::new();
        cache.of(&metadata);
        cache.add_frame(PageFrame {
            partition_index: 0,
            partition_row_lo: 0,
            row_count: 2,
            columns: smallvec![
                ColumnAddress::new(Arc::from(prices), 0, 16),
                ColumnAddress::new(Arc::from(keys), 0, 8),
                ColumnAddress::new(Arc::from(qty), 0, 4),
            ],
        });

        let mut symbols = MemorySymbolTableSource::new();
        symbols.insert(1, venues);

        (Arc::new(cache), symbols)
    }

    #[test]
    fn test_reads_positioned_values() {
        let (cache, symbols) = cache_with_symbols();
        let mut record = PageAddressCacheRecord::new();
        record.of(&symbols, cache);

        record.set_row_index(1);
        assert_eq!(record.get_double(0), 2.5);
        assert_eq!(record.get_sym(1), Some("LSE"));
        assert_eq!(record.get_short(2), -3);
        assert_eq!(record.get_row_id(), to_row_id(0, 1));

        record.set_row_index(0);
        assert_eq!(record.get_sym(1), Some("NYSE"));
        assert_eq!(record.get_int(1), 1);
    }

    #[test]
    fn test_clone_is_positioned_independently() {
        let (cache, symbols) = cache_with_symbols();
        let mut record = PageAddressCacheRecord::new();
        record.of(&symbols, cache);

        let mut record_b = record.clone();
        record_b.set_row_index(1);

        assert_eq!(record.get_double(0), 1.5);
        assert_eq!(record_b.get_double(0), 2.5);
        assert!(Arc::ptr_eq(record.address_cache(), record_b.address_cache()));
    }
}
