//! Immutable document versions.
//!
//! A document is one frozen version of an item's content. Caller fields
//! are stored as-is; bookkeeping lives in fields with a reserved `_`
//! prefix, injected here and stripped again by [`Documents::blank_copy`].

use serde_json::Value;

use crate::backend::{Collection, Database, ID_FIELD};
use crate::error::{Result, StoreError};
use crate::types::{CommitId, DocumentId, Fields, ItemId, Link, Tags};

/// Collection holding document versions.
pub const DOCUMENTS_COLLECTION: &str = "documents";

/// Prefix reserved for internal fields. Caller bodies must not use it.
pub const RESERVED_PREFIX: char = '_';

/// Internal field: the item this version belongs to.
pub const FIELD_ITEM: &str = "_item";

/// Internal field: the commit this version was written in.
pub const FIELD_COMMIT: &str = "_commit";

/// Internal field: outgoing links of this version.
pub const FIELD_LINKS: &str = "_links";

/// Internal field: tag map of this version.
pub const FIELD_TAGS: &str = "_tags";

/// Typed access to the documents collection.
pub struct Documents {
    collection: Collection,
}

impl Documents {
    pub fn new(db: &Database) -> Self {
        Self { collection: db.collection(DOCUMENTS_COLLECTION) }
    }

    /// Name of the underlying collection, for pipeline joins.
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    /// Write a new document version. Internal fields are injected after
    /// the body is copied, so they always win over caller fields.
    pub fn add(
        &self,
        body: &Fields,
        item: ItemId,
        commit: CommitId,
        links: &[Link],
        tags: &Tags,
    ) -> Result<DocumentId> {
        let mut record = body.clone();
        record.insert(FIELD_ITEM.to_string(), Value::from(item.0));
        record.insert(FIELD_COMMIT.to_string(), Value::from(commit.0));
        record.insert(FIELD_LINKS.to_string(), serde_json::to_value(links)?);
        record.insert(FIELD_TAGS.to_string(), tags_value(tags));

        let id = self
            .collection
            .insert(record)
            .map_err(|_| StoreError::CouldNotInsert(DOCUMENTS_COLLECTION))?;
        Ok(DocumentId(id))
    }

    /// Delete every document version.
    pub fn clear(&self) -> Result<()> {
        self.collection.clear()
    }

    /// Copy of a document with every internal field stripped. This is the
    /// caller-visible body, ready to be merged and re-persisted.
    pub fn blank_copy(document: &Fields) -> Fields {
        document
            .iter()
            .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Id of a document record.
    pub fn id_of(document: &Fields) -> Result<DocumentId> {
        field_id(document, ID_FIELD).map(DocumentId)
    }

    /// Item a document version belongs to.
    pub fn item_of(document: &Fields) -> Result<ItemId> {
        field_id(document, FIELD_ITEM).map(ItemId)
    }

    /// Outgoing links of a document version. Missing field reads as no
    /// links.
    pub fn links_of(document: &Fields) -> Result<Vec<Link>> {
        match document.get(FIELD_LINKS) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| StoreError::Deserialization(format!("bad {FIELD_LINKS}: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    /// Tag map of a document version. Missing field reads as no tags.
    pub fn tags_of(document: &Fields) -> Result<Tags> {
        match document.get(FIELD_TAGS) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| StoreError::Deserialization(format!("bad {FIELD_TAGS}: {e}"))),
            None => Ok(Tags::new()),
        }
    }
}

/// Build the stored `_tags` value. Infallible, for use where `?` is not
/// available.
pub(crate) fn tags_value(tags: &Tags) -> Value {
    Value::Object(
        tags.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn field_id(document: &Fields, field: &str) -> Result<u64> {
    document
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Runtime(format!("document missing {field}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_add_injects_internal_fields() {
        let db = Database::in_memory();
        let documents = Documents::new(&db);

        let body = fields(json!({"name": "thing", "_commit": 999}));
        let tags = Tags::from([("kind".to_string(), "demo".to_string())]);
        let id = documents
            .add(&body, ItemId(4), CommitId(2), &[Link::new(ItemId(9), "owns")], &tags)
            .unwrap();

        let stored = db.collection(DOCUMENTS_COLLECTION).get(id.0).unwrap();
        assert_eq!(stored["name"], "thing");
        assert_eq!(stored["_item"], 4);
        // Internal fields win over anything the body smuggled in.
        assert_eq!(stored["_commit"], 2);
        assert_eq!(stored["_links"], json!([{"target": 9, "type": "owns"}]));
        assert_eq!(stored["_tags"], json!({"kind": "demo"}));
    }

    #[test]
    fn test_blank_copy_strips_internals() {
        let doc = fields(json!({
            "_id": 1, "_item": 2, "_commit": 3,
            "_links": [], "_tags": {},
            "name": "kept", "count": 5
        }));
        assert_eq!(Documents::blank_copy(&doc), fields(json!({"name": "kept", "count": 5})));
    }

    #[test]
    fn test_accessors() {
        let doc = fields(json!({
            "_id": 11, "_item": 4,
            "_links": [{"target": 2, "type": "owned_by"}],
            "_tags": {"a": "b"}
        }));
        assert_eq!(Documents::id_of(&doc).unwrap(), DocumentId(11));
        assert_eq!(Documents::item_of(&doc).unwrap(), ItemId(4));
        assert_eq!(Documents::links_of(&doc).unwrap(), vec![Link::new(ItemId(2), "owned_by")]);
        assert_eq!(Documents::tags_of(&doc).unwrap()["a"], "b");

        let bare = fields(json!({"_id": 1, "_item": 2}));
        assert!(Documents::links_of(&bare).unwrap().is_empty());
        assert!(Documents::tags_of(&bare).unwrap().is_empty());
    }
}
