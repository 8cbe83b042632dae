//! Core types for the versioned document store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, StoreError};

/// Unique identifier for an item (stable identity, never carries content).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one immutable document version.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a commit. Ids are assigned monotonically, so a
/// larger id always means a later-created commit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(pub u64);

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author identity stamped onto commits. Supplied by the caller (e.g. an
/// authorization layer); opaque to the store.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorId(pub String);

impl fmt::Debug for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorId({})", self.0)
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuthorId {
    fn from(s: &str) -> Self {
        AuthorId(s.to_string())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Schemaless record content: a flat map of JSON fields.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Tag map attached to a document version. Merged, never replaced, on write.
pub type Tags = BTreeMap<String, String>;

/// A typed, directed relation from one item's document to another item.
/// Uniqueness key within one document is `(target, kind)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub target: ItemId,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Link {
    pub fn new(target: ItemId, kind: impl Into<String>) -> Self {
        Self { target, kind: kind.into() }
    }
}

/// One entry in a commit's base: the document version an item has at that
/// snapshot. A base never holds two entries for the same item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEntry {
    pub item: ItemId,
    pub document: DocumentId,
}

/// An immutable snapshot record: which items exist and which document
/// version each currently has, linked to its predecessor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    #[serde(rename = "_id")]
    pub id: CommitId,
    pub date: Timestamp,
    pub previous: Option<CommitId>,
    pub base: Vec<BaseEntry>,
    pub author: Option<AuthorId>,
    pub is_head: bool,
}

/// A freshly created head commit being assembled by one operation.
/// The base starts as a copy of the old head's base and is rewritten once
/// before the operation returns.
#[derive(Clone, Debug)]
pub struct CommitDraft {
    pub id: CommitId,
    pub base: Vec<BaseEntry>,
    pub previous: Option<CommitId>,
}

impl CommitDraft {
    /// Guard for operations that need the prior snapshot as a merge
    /// baseline. Fails on a root commit.
    pub fn require_previous(&self) -> Result<CommitId> {
        self.previous.ok_or_else(|| {
            StoreError::Runtime(format!("commit {} has no previous commit", self.id))
        })
    }
}

/// Per-operation context carrying the author identity stamped onto any
/// commit the operation creates.
#[derive(Clone, Debug, Default)]
pub struct OpContext {
    pub author: Option<AuthorId>,
}

impl OpContext {
    /// Anonymous context: commits are created with no author.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context acting as the given author.
    pub fn by(author: impl Into<AuthorId>) -> Self {
        Self { author: Some(author.into()) }
    }
}

impl From<AuthorId> for OpContext {
    fn from(author: AuthorId) -> Self {
        Self { author: Some(author) }
    }
}

/// Result of [`Store::add_item`](crate::Store::add_item).
#[derive(Clone, Debug)]
pub struct NewItem {
    pub item: ItemId,
    pub document: DocumentId,
    pub commit: CommitId,
    /// New document version written for the parent when it was relinked.
    pub parent_document: Option<DocumentId>,
}

/// Result of [`Store::add_items`](crate::Store::add_items).
#[derive(Clone, Debug)]
pub struct NewItems {
    pub items: Vec<ItemId>,
    pub documents: Vec<DocumentId>,
    pub commit: CommitId,
    pub parent_document: Option<DocumentId>,
}

/// Result of a single-item mutation.
#[derive(Clone, Debug)]
pub struct ItemUpdate {
    pub commit: CommitId,
    pub document: DocumentId,
}

/// Result of [`Store::patch`](crate::Store::patch).
#[derive(Clone, Debug)]
pub struct PatchResult {
    pub commit: CommitId,
    pub documents: Vec<DocumentId>,
}

/// Result of link/unlink operations.
#[derive(Clone, Debug)]
pub struct LinkResult {
    pub source: DocumentId,
    pub target: DocumentId,
    pub commit: CommitId,
}

/// Result of a cascade delete: the deleted item and every transitively
/// owned descendant, in traversal order.
#[derive(Clone, Debug)]
pub struct Deletion {
    pub items: Vec<ItemId>,
    pub commit: CommitId,
}

/// Serialize a value into a flat record. Fails when the value is not a
/// JSON object.
pub(crate) fn to_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Serialization(format!(
            "expected an object record, got {other}"
        ))),
    }
}

/// Deserialize a record into a typed value.
pub(crate) fn from_fields<T: serde::de::DeserializeOwned>(fields: Fields) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(fields))
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}
