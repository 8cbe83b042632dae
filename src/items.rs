//! Item identity rows.
//!
//! An item is pure identity: its row never carries content, only the
//! commit it was created in. All content lives in document versions.

use serde::Serialize;

use crate::backend::{Collection, Database};
use crate::error::{Result, StoreError};
use crate::types::{to_fields, CommitId, ItemId};

/// Collection holding item rows.
pub const ITEMS_COLLECTION: &str = "items";

#[derive(Serialize)]
struct ItemRow {
    creation_commit: CommitId,
}

/// Typed access to the items collection.
pub struct Items {
    collection: Collection,
}

impl Items {
    pub fn new(db: &Database) -> Self {
        Self { collection: db.collection(ITEMS_COLLECTION) }
    }

    /// Name of the underlying collection, for pipeline joins.
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    /// Mint a new item, recording the commit it first appears in.
    pub fn add(&self, commit: CommitId) -> Result<ItemId> {
        let row = to_fields(&ItemRow { creation_commit: commit })?;
        let id = self
            .collection
            .insert(row)
            .map_err(|_| StoreError::CouldNotInsert(ITEMS_COLLECTION))?;
        Ok(ItemId(id))
    }

    /// Delete every item row.
    pub fn clear(&self) -> Result<()> {
        self.collection.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_records_creation_commit() {
        let db = Database::in_memory();
        let items = Items::new(&db);

        let a = items.add(CommitId(1)).unwrap();
        let b = items.add(CommitId(2)).unwrap();
        assert_eq!(a, ItemId(1));
        assert_eq!(b, ItemId(2));

        let row = db.collection(ITEMS_COLLECTION).get(a.0).unwrap();
        assert_eq!(row["creation_commit"], 1);
    }
}
