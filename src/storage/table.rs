use crate::core::{Record, Value};
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};

/// One entity table: rows keyed by id plus a secondary index per foreign key.
///
/// Backed by persistent maps, so cloning a table (and therefore a whole
/// store state) is O(1) and writers never disturb readers of an older copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    name: String,
    rows: OrdMap<String, Record>,
    indexed_fields: Vec<String>,
    #[serde(skip)]
    indexes: OrdMap<String, OrdMap<Value, OrdSet<String>>>,
}

impl Table {
    pub fn new(name: impl Into<String>, indexed_fields: Vec<String>) -> Self {
        let indexes = indexed_fields
            .iter()
            .map(|f| (f.clone(), OrdMap::new()))
            .collect();
        Self {
            name: name.into(),
            rows: OrdMap::new(),
            indexed_fields,
            indexes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in id order.
    pub fn scan(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }

    /// Insert or replace a row, returning the previous version.
    pub fn put(&mut self, record: Record) -> Option<Record> {
        let previous = self.rows.insert(record.id.clone(), record.clone());
        if let Some(old) = &previous {
            self.unindex(old);
        }
        self.index(&record);
        previous
    }

    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let removed = self.rows.remove(id);
        if let Some(old) = &removed {
            self.unindex(old);
        }
        removed
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }

    pub fn indexed_fields(&self) -> &[String] {
        &self.indexed_fields
    }

    /// Ids whose `field` equals `value`, or `None` if the field has no index.
    pub fn lookup(&self, field: &str, value: &Value) -> Option<Vec<&Record>> {
        let index = self.indexes.get(field)?;
        let rows = index
            .get(value)
            .map(|ids| ids.iter().filter_map(|id| self.rows.get(id)).collect())
            .unwrap_or_default();
        Some(rows)
    }

    /// Replace the index set and rebuild every index from the rows.
    pub fn reindex(&mut self, indexed_fields: Vec<String>) {
        self.indexed_fields = indexed_fields;
        self.indexes = self
            .indexed_fields
            .iter()
            .map(|f| (f.clone(), OrdMap::new()))
            .collect();
        let rows: Vec<Record> = self.rows.values().cloned().collect();
        for row in &rows {
            self.index(row);
        }
    }

    fn index(&mut self, record: &Record) {
        for field in &self.indexed_fields {
            let Some(index) = self.indexes.get_mut(field) else {
                continue;
            };
            let value = record.value(field);
            let mut ids = index.get(&value).cloned().unwrap_or_default();
            ids.insert(record.id.clone());
            index.insert(value, ids);
        }
    }

    fn unindex(&mut self, record: &Record) {
        for field in &self.indexed_fields {
            let Some(index) = self.indexes.get_mut(field) else {
                continue;
            };
            let value = record.value(field);
            let now_empty = match index.get_mut(&value) {
                Some(ids) => {
                    ids.remove(&record.id);
                    ids.is_empty()
                }
                None => false,
            };
            if now_empty {
                index.remove(&value);
            }
        }
    }
}
