//! The commit chain.
//!
//! Commits are full snapshots: each base lists every live item with its
//! current document version. Exactly one commit is the head once the
//! operation that created it finishes; `previous` links form the history
//! chain, and branches cut off by a head reset simply stay in place.

use serde::Serialize;
use serde_json::Value;

use crate::backend::{Collection, Database, Filter, Stage, ID_FIELD};
use crate::error::{Result, StoreError};
use crate::types::{
    from_fields, to_fields, AuthorId, BaseEntry, Commit, CommitDraft, CommitId, Fields, Timestamp,
};

/// Collection holding commit rows.
pub const COMMITS_COLLECTION: &str = "commits";

/// Field marking the current head commit.
pub const FIELD_IS_HEAD: &str = "is_head";

#[derive(Serialize)]
struct NewCommitRow<'a> {
    date: Timestamp,
    previous: Option<CommitId>,
    base: Vec<BaseEntry>,
    author: Option<&'a AuthorId>,
    is_head: bool,
}

/// Typed access to the commits collection.
pub struct Commits {
    collection: Collection,
}

impl Commits {
    pub fn new(db: &Database) -> Self {
        Self { collection: db.collection(COMMITS_COLLECTION) }
    }

    /// Run a read pipeline rooted at the commits collection.
    pub fn aggregate(&self, stages: &[Stage]) -> Result<Vec<Fields>> {
        self.collection.aggregate(stages)
    }

    /// Delete every commit row.
    pub fn clear(&self) -> Result<()> {
        self.collection.clear()
    }

    /// The current head commit, if any commit exists.
    pub fn get_head(&self) -> Result<Option<Commit>> {
        self.collection
            .find_one(&Filter::eq(FIELD_IS_HEAD, true))
            .map(from_fields)
            .transpose()
    }

    /// The most recently created commit, head or not. Ids are monotonic,
    /// so this is simply the greatest id.
    pub fn get_latest(&self) -> Result<Commit> {
        self.collection
            .last()
            .ok_or_else(|| StoreError::NotFound("no commits exist".into()))
            .and_then(from_fields)
    }

    /// A specific commit, or the head when no id is given.
    pub fn get(&self, commit: Option<CommitId>) -> Result<Commit> {
        match commit {
            Some(id) => self
                .collection
                .find_one(&Filter::eq(ID_FIELD, id.0))
                .ok_or_else(|| StoreError::NotFound(format!("commit {id}")))
                .and_then(from_fields),
            None => self
                .get_head()?
                .ok_or_else(|| StoreError::NotFound("no head commit".into())),
        }
    }

    /// Start a new head commit on top of the current head. The stored base
    /// is empty until [`update`](Self::update) writes the final one; the
    /// returned draft carries a working copy of the old head's base.
    ///
    /// With `require_previous` the call fails instead of creating a root
    /// commit on an empty chain.
    pub fn create(&self, author: Option<&AuthorId>, require_previous: bool) -> Result<CommitDraft> {
        let head = self.get_head()?;
        if require_previous && head.is_none() {
            return Err(StoreError::NotFound("no head commit to build on".into()));
        }

        let previous = head.as_ref().map(|c| c.id);
        let row = to_fields(&NewCommitRow {
            date: Timestamp::now(),
            previous,
            base: Vec::new(),
            author,
            is_head: true,
        })?;
        let id = self
            .collection
            .insert(row)
            .map_err(|_| StoreError::CouldNotInsert(COMMITS_COLLECTION))?;

        if let Some(old_head) = &head {
            self.set_head_flag(old_head.id, false)
                .map_err(|_| StoreError::CouldNotUpdate(COMMITS_COLLECTION))?;
        }

        Ok(CommitDraft {
            id: CommitId(id),
            base: head.map(|c| c.base).unwrap_or_default(),
            previous,
        })
    }

    /// Write a commit's final base list.
    pub fn update(&self, commit: CommitId, base: &[BaseEntry]) -> Result<()> {
        let value = serde_json::to_value(base)?;
        let matched = self.collection.update(commit.0, |record| {
            record.insert("base".to_string(), value);
        })?;
        if !matched {
            return Err(StoreError::CouldNotUpdate(COMMITS_COLLECTION));
        }
        Ok(())
    }

    /// Move the head flag to the given commit. The caller has already
    /// validated that the commit exists.
    pub fn reset_head(&self, commit: CommitId) -> Result<()> {
        if let Some(head) = self.get_head()? {
            self.set_head_flag(head.id, false)
                .map_err(|_| StoreError::Runtime("could not unset current head".into()))?;
        }
        self.set_head_flag(commit, true)
            .map_err(|_| StoreError::Runtime(format!("could not set head to commit {commit}")))
    }

    fn set_head_flag(&self, commit: CommitId, is_head: bool) -> Result<()> {
        let matched = self.collection.update(commit.0, |record| {
            record.insert(FIELD_IS_HEAD.to_string(), Value::Bool(is_head));
        })?;
        if !matched {
            return Err(StoreError::CouldNotUpdate(COMMITS_COLLECTION));
        }
        Ok(())
    }
}
