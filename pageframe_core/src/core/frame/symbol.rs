use std::sync::Arc;

use ahash::AHashMap;

/// Dictionary of a SYMBOL column: dense i32 keys to string values.
pub trait SymbolTable: Send + Sync {
    fn value_of(&self, key: i32) -> Option<&str>;

    fn key_of(&self, value: &str) -> Option<i32>;

    fn size(&self) -> usize;
}

pub trait SymbolTableSource: Send + Sync {
    fn symbol_table(&self, column_index: usize) -> Option<Arc<dyn SymbolTable>>;
}

#[derive(Debug, Default, Clone)]
pub struct MemorySymbolTable {
    values: Vec<String>,
    keys: AHashMap<String, i32>,
}

impl MemorySymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key of `value`, adding it when not yet present.
    pub fn put(&mut self, value: &str) -> i32 {
        if let Some(key) = self.keys.get(value) {
            return *key;
        }

        let key = self.values.len() as i32;
        self.values.push(value.to_string());
        self.keys.insert(value.to_string(), key);
        key
    }
}

impl SymbolTable for MemorySymbolTable {
    fn value_of(&self, key: i32) -> Option<&str> {
        if key < 0 {
            return None;
        }
        self.values.get(key as usize).map(|v| v.as_str())
    }

    fn key_of(&self, value: &str) -> Option<i32> {
        self.keys.get(value).copied()
    }

    fn size(&self) -> usize {
        self.values.len()
    }
}

#[derive(Default, Clone)]
pub struct MemorySymbolTableSource {
    tables: AHashMap<usize, Arc<MemorySymbolTable>>,
}

impl MemorySymbolTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column_index: usize, table: MemorySymbolTable) {
        self.tables.insert(column_index, Arc::new(table));
    }
}

impl SymbolTableSource for MemorySymbolTableSource {
    fn symbol_table(&self, column_index: usize) -> Option<Arc<dyn SymbolTable>> {
        self.tables
            .get(&column_index)
            .map(|t| Arc::clone(t) as Arc<dyn SymbolTable>)
    }
}
