//! Thin handle to one named collection.
//!
//! No business rules live here: a handle moves records in and out of its
//! collection, assigns ids on insert, and executes read pipelines.

use serde_json::Value;
use std::sync::Arc;

use super::database::{CollectionData, DatabaseInner};
use super::pipeline::{self, Filter, Stage};
use crate::error::Result;
use crate::types::Fields;

/// Name of the id field injected on insert.
pub const ID_FIELD: &str = "_id";

/// Handle to one named collection. Cheap to clone.
#[derive(Clone)]
pub struct Collection {
    name: String,
    inner: Arc<DatabaseInner>,
}

impl Collection {
    pub(crate) fn new(name: String, inner: Arc<DatabaseInner>) -> Self {
        Self { name, inner }
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a record, assigning the next id. The `_id` field of the
    /// supplied record, if any, is overwritten.
    pub fn insert(&self, mut record: Fields) -> Result<u64> {
        let mut collections = self.inner.collections.write();
        let data = collections
            .entry(self.name.clone())
            .or_insert_with(CollectionData::new);

        let id = data.next_id;
        data.next_id += 1;
        record.insert(ID_FIELD.to_string(), Value::from(id));
        data.records.insert(id, record);
        Ok(id)
    }

    /// Apply an in-place edit to the record with the given id. Returns
    /// whether a record matched.
    pub fn update(&self, id: u64, edit: impl FnOnce(&mut Fields)) -> Result<bool> {
        let mut collections = self.inner.collections.write();
        let data = collections
            .entry(self.name.clone())
            .or_insert_with(CollectionData::new);

        match data.records.get_mut(&id) {
            Some(record) => {
                edit(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every record. The id counter is not reset.
    pub fn clear(&self) -> Result<()> {
        let mut collections = self.inner.collections.write();
        if let Some(data) = collections.get_mut(&self.name) {
            data.records.clear();
        }
        Ok(())
    }

    /// Record with the given id.
    pub fn get(&self, id: u64) -> Option<Fields> {
        self.inner
            .collections
            .read()
            .get(&self.name)
            .and_then(|data| data.records.get(&id).cloned())
    }

    /// All records, in id (insertion) order.
    pub fn all(&self) -> Vec<Fields> {
        self.inner
            .collections
            .read()
            .get(&self.name)
            .map(|data| data.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Records matching the filter, in id order.
    pub fn find(&self, filter: &Filter) -> Vec<Fields> {
        self.inner
            .collections
            .read()
            .get(&self.name)
            .map(|data| {
                data.records
                    .values()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First record matching the filter.
    pub fn find_one(&self, filter: &Filter) -> Option<Fields> {
        self.inner
            .collections
            .read()
            .get(&self.name)
            .and_then(|data| data.records.values().find(|r| filter.matches(r)).cloned())
    }

    /// The most recently inserted record still present (greatest id).
    pub fn last(&self) -> Option<Fields> {
        self.inner
            .collections
            .read()
            .get(&self.name)
            .and_then(|data| data.records.values().next_back().cloned())
    }

    /// Number of records.
    pub fn count(&self) -> usize {
        self.inner
            .collections
            .read()
            .get(&self.name)
            .map(|data| data.records.len())
            .unwrap_or(0)
    }

    /// Execute a read pipeline against a snapshot of this collection.
    /// `Lookup` stages resolve sibling collections of the same database.
    pub fn aggregate(&self, stages: &[Stage]) -> Result<Vec<Fields>> {
        let collections = self.inner.collections.read();
        let input = collections
            .get(&self.name)
            .map(|data| data.records.values().cloned().collect())
            .unwrap_or_default();

        Ok(pipeline::run(stages, input, &|name: &str| {
            collections
                .get(name)
                .map(|data| data.records.values().cloned().collect())
                .unwrap_or_default()
        }))
    }

}
