//! The versioned store.
//!
//! Every write runs as one logical operation: it creates exactly one new
//! head commit, writes the document versions it needs, and rewrites that
//! commit's base once before returning. Reads resolve a commit's base
//! through the pipeline into full document records.
//!
//! Writes serialize on an internal lock, so no reader ever observes a
//! half-built head commit. Reads take no lock.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;

use crate::backend::{Database, Filter, Stage, ID_FIELD};
use crate::commits::{Commits, FIELD_IS_HEAD};
use crate::documents::{
    tags_value, Documents, FIELD_ITEM, FIELD_LINKS, FIELD_TAGS, RESERVED_PREFIX,
};
use crate::error::{Result, StoreError};
use crate::items::Items;
use crate::types::{
    BaseEntry, Commit, CommitDraft, CommitId, Deletion, DocumentId, Fields, ItemId, ItemUpdate,
    Link, LinkResult, NewItem, NewItems, OpContext, PatchResult, Tags,
};

/// Link kind from an owner to an owned item. Deletion cascades over it.
pub const OWNS: &str = "owns";

/// Back link kind from an owned item to its owner.
pub const OWNED_BY: &str = "owned_by";

/// What a [`Store::patch`] callback produced.
pub enum PatchOutcome {
    /// Field sets to merge into the matched documents, one per document
    /// in matching order. The store writes the new versions.
    Fields(Vec<Fields>),
    /// The callback already wrote document versions itself; these are
    /// their ids. The base is carried forward unchanged.
    Written(Vec<DocumentId>),
}

/// A versioned document store over one database.
///
/// Items are stable identities, documents are immutable content versions,
/// and commits snapshot which version every live item has. Mutating an
/// item never touches old versions; deleting it only drops it from the
/// new head's base, so any older commit can still be read or become the
/// head again.
pub struct Store {
    items: Items,
    documents: Documents,
    commits: Commits,
    write_lock: Mutex<()>,
}

impl Store {
    pub fn new(db: &Database) -> Self {
        Self {
            items: Items::new(db),
            documents: Documents::new(db),
            commits: Commits::new(db),
            write_lock: Mutex::new(()),
        }
    }

    /// Id of the current head commit.
    pub fn head_commit_id(&self) -> Result<CommitId> {
        self.commits
            .get_head()?
            .map(|c| c.id)
            .ok_or_else(|| StoreError::NotFound("no head commit".into()))
    }

    /// A commit record, or the head when no id is given.
    pub fn commit(&self, id: Option<CommitId>) -> Result<Commit> {
        self.commits.get(id)
    }

    /// Document version an item has in the given commit (head when not
    /// given). `None` when the item is not part of that snapshot, e.g.
    /// deleted.
    pub fn document_id(&self, item: ItemId, commit: Option<CommitId>) -> Result<Option<DocumentId>> {
        let commit = self.commits.get(commit)?;
        Ok(commit
            .base
            .iter()
            .find(|entry| entry.item == item)
            .map(|entry| entry.document))
    }

    /// All documents of the head commit, in base order, optionally
    /// filtered.
    pub fn head_items(&self, filter: Option<&Filter>) -> Result<Vec<Fields>> {
        self.document_request(Filter::eq(FIELD_IS_HEAD, true), None, filter)
    }

    /// The head document of one item.
    pub fn head_item(&self, item: ItemId) -> Result<Fields> {
        let results =
            self.document_request(Filter::eq(FIELD_IS_HEAD, true), Some(item_filter(item)), None)?;
        ensure_single(results, item)
    }

    /// All documents of one commit, in base order.
    pub fn items_in_commit(&self, commit: CommitId) -> Result<Vec<Fields>> {
        self.document_request(Filter::eq(ID_FIELD, commit.0), None, None)
    }

    /// The document of one item at one commit.
    pub fn item_in_commit(&self, commit: CommitId, item: ItemId) -> Result<Fields> {
        let results =
            self.document_request(Filter::eq(ID_FIELD, commit.0), Some(item_filter(item)), None)?;
        ensure_single(results, item)
    }

    /// Head documents carrying the tag with the given value.
    pub fn items_by_tag(&self, tag: &str, value: &str) -> Result<Vec<Fields>> {
        let filter = Filter::eq(format!("{FIELD_TAGS}.{tag}"), value);
        self.head_items(Some(&filter))
    }

    /// Create an item with its first document version in a new commit.
    /// With a parent, the child is created `owned_by` the parent and the
    /// parent gets a new version with an `owns` link to the child.
    pub fn add_item(
        &self,
        ctx: &OpContext,
        body: Fields,
        parent: Option<ItemId>,
        tags: Option<&Tags>,
    ) -> Result<NewItem> {
        check_body(&body)?;
        let _guard = self.write_lock.lock();
        if let Some(parent) = parent {
            self.require_live(parent)?;
        }

        let mut commit = self.commits.create(ctx.author.as_ref(), parent.is_some())?;
        let (item, document) = self.insert_item_with_document(&body, commit.id, parent, tags)?;
        commit.base.push(BaseEntry { item, document });

        let mut parent_document = None;
        if let Some(parent) = parent {
            parent_document = Some(self.write_links(&mut commit, parent, &[item], OWNS)?);
        }
        self.commits.update(commit.id, &commit.base)?;

        tracing::debug!(item = %item, commit = %commit.id, "added item");
        Ok(NewItem { item, document, commit: commit.id, parent_document })
    }

    /// Create several items in one commit. With a parent, every child is
    /// `owned_by` it and the parent gets a single new version with `owns`
    /// links to all of them.
    pub fn add_items(
        &self,
        ctx: &OpContext,
        bodies: Vec<Fields>,
        parent: Option<ItemId>,
        tags: Option<&Tags>,
    ) -> Result<NewItems> {
        for body in &bodies {
            check_body(body)?;
        }
        let _guard = self.write_lock.lock();
        if let Some(parent) = parent {
            self.require_live(parent)?;
        }

        let mut commit = self.commits.create(ctx.author.as_ref(), parent.is_some())?;
        let mut items = Vec::with_capacity(bodies.len());
        let mut documents = Vec::with_capacity(bodies.len());
        for body in &bodies {
            let (item, document) = self.insert_item_with_document(body, commit.id, parent, tags)?;
            commit.base.push(BaseEntry { item, document });
            items.push(item);
            documents.push(document);
        }

        let mut parent_document = None;
        if let Some(parent) = parent {
            parent_document = Some(self.write_links(&mut commit, parent, &items, OWNS)?);
        }
        self.commits.update(commit.id, &commit.base)?;

        tracing::debug!(count = items.len(), commit = %commit.id, "added items");
        Ok(NewItems { items, documents, commit: commit.id, parent_document })
    }

    /// Store a new version of an item's content. The body is merged over
    /// the current version; fields not named keep their value.
    pub fn update_item(&self, ctx: &OpContext, item: ItemId, body: Fields) -> Result<ItemUpdate> {
        check_body(&body)?;
        self.merge_new_version(ctx, item, &body)
    }

    /// Set individual fields of an item, leaving the rest of the content
    /// untouched.
    pub fn patch_item_fields(
        &self,
        ctx: &OpContext,
        item: ItemId,
        fields: Fields,
    ) -> Result<ItemUpdate> {
        check_body(&fields)?;
        self.merge_new_version(ctx, item, &fields)
    }

    /// Update every head document matching the filter in one commit. The
    /// callback sees the matched documents and decides the outcome.
    pub fn patch(
        &self,
        ctx: &OpContext,
        filter: &Filter,
        apply: impl FnOnce(&[Fields]) -> PatchOutcome,
    ) -> Result<PatchResult> {
        let _guard = self.write_lock.lock();
        self.patch_locked(ctx, filter, apply)
    }

    /// Link `source` to `target` with the given kind, writing a new
    /// source version. With `back_kind`, a reverse link is written into a
    /// new target version in the same commit. Both items must be live.
    pub fn link_item(
        &self,
        ctx: &OpContext,
        source: ItemId,
        target: ItemId,
        kind: &str,
        back_kind: Option<&str>,
    ) -> Result<LinkResult> {
        let _guard = self.write_lock.lock();
        self.require_live(source)?;
        let target_document = self.require_live(target)?;

        let mut commit = self.commits.create(ctx.author.as_ref(), false)?;
        let source_document = self.write_links(&mut commit, source, &[target], kind)?;
        let target_document = match back_kind {
            Some(back) => self.write_links(&mut commit, target, &[source], back)?,
            None => target_document,
        };
        self.commits.update(commit.id, &commit.base)?;

        tracing::debug!(%source, %target, kind, commit = %commit.id, "linked items");
        Ok(LinkResult { source: source_document, target: target_document, commit: commit.id })
    }

    /// Remove the `(target, kind)` link from `source`, writing a new
    /// source version. With `back_kind`, the reverse link is removed from
    /// a new target version in the same commit.
    pub fn unlink_item(
        &self,
        ctx: &OpContext,
        source: ItemId,
        target: ItemId,
        kind: &str,
        back_kind: Option<&str>,
    ) -> Result<LinkResult> {
        let _guard = self.write_lock.lock();
        self.require_live(source)?;
        let target_document = self.require_live(target)?;

        let mut commit = self.commits.create(ctx.author.as_ref(), false)?;
        let source_document = self.increment_document(&mut commit, source, |links| {
            remove_link(links, target, kind);
        })?;
        let target_document = match back_kind {
            Some(back) => self.increment_document(&mut commit, target, |links| {
                remove_link(links, source, back);
            })?,
            None => target_document,
        };
        self.commits.update(commit.id, &commit.base)?;

        tracing::debug!(%source, %target, kind, commit = %commit.id, "unlinked items");
        Ok(LinkResult { source: source_document, target: target_document, commit: commit.id })
    }

    /// Merge tags into every listed item's tag map, in one commit. Tags
    /// already present and not named keep their value.
    pub fn add_tag_to_items(
        &self,
        ctx: &OpContext,
        items: &[ItemId],
        tags: &Tags,
    ) -> Result<PatchResult> {
        let _guard = self.write_lock.lock();
        let filter = Filter::within(
            FIELD_ITEM,
            items.iter().map(|item| Value::from(item.0)).collect(),
        );
        self.patch_locked(ctx, &filter, |docs| {
            PatchOutcome::Fields(
                docs.iter()
                    .map(|doc| {
                        let mut merged = Documents::tags_of(doc).unwrap_or_default();
                        merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                        Fields::from_iter([(FIELD_TAGS.to_string(), tags_value(&merged))])
                    })
                    .collect(),
            )
        })
    }

    /// Delete an item and everything it transitively owns from the new
    /// head. Old commits keep the items; returns the deleted ids in
    /// traversal order, the root first.
    pub fn delete_item(&self, ctx: &OpContext, item: ItemId) -> Result<Deletion> {
        let _guard = self.write_lock.lock();
        self.require_live(item)?;

        let mut commit = self.commits.create(ctx.author.as_ref(), false)?;
        let previous = commit.require_previous()?;

        // Preorder walk over `owns` links at the previous commit. The
        // seen set guards against link cycles; descendants no longer in
        // that snapshot are skipped.
        let mut deleted = Vec::new();
        let mut seen = HashSet::from([item]);
        let mut pending = vec![item];
        while let Some(current) = pending.pop() {
            let document = match self.item_in_commit(previous, current) {
                Ok(document) => document,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            deleted.push(current);

            let owned: Vec<ItemId> = Documents::links_of(&document)?
                .into_iter()
                .filter(|link| link.kind == OWNS)
                .map(|link| link.target)
                .collect();
            for &child in owned.iter().rev() {
                if seen.insert(child) {
                    pending.push(child);
                }
            }
        }

        let gone: HashSet<ItemId> = deleted.iter().copied().collect();
        commit.base.retain(|entry| !gone.contains(&entry.item));
        self.commits.update(commit.id, &commit.base)?;

        tracing::debug!(root = %item, count = deleted.len(), commit = %commit.id, "deleted items");
        Ok(Deletion { items: deleted, commit: commit.id })
    }

    /// Move the head to the given commit, or to the most recently created
    /// commit when none is given. Commits after the new head stay in
    /// place as an orphaned branch.
    pub fn reset_head(&self, commit: Option<CommitId>) -> Result<CommitId> {
        let _guard = self.write_lock.lock();
        let target = match commit {
            Some(id) => self.commits.get(Some(id))?.id,
            None => self.commits.get_latest()?.id,
        };
        self.commits.reset_head(target)?;

        tracing::debug!(commit = %target, "reset head");
        Ok(target)
    }

    /// Drop all items, documents and commits.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.items.clear()?;
        self.documents.clear()?;
        self.commits.clear()
    }

    fn patch_locked(
        &self,
        ctx: &OpContext,
        filter: &Filter,
        apply: impl FnOnce(&[Fields]) -> PatchOutcome,
    ) -> Result<PatchResult> {
        let docs = self.head_items(Some(filter))?;
        if docs.is_empty() {
            return Err(StoreError::NotFound("no head items match the filter".into()));
        }

        // Run the callback and validate its outcome before touching the
        // chain, so a misbehaving callback leaves no stray head commit.
        let outcome = apply(&docs);
        if let PatchOutcome::Fields(updates) = &outcome {
            if updates.len() != docs.len() {
                return Err(StoreError::Runtime(format!(
                    "patch produced {} field sets for {} documents",
                    updates.len(),
                    docs.len()
                )));
            }
        }

        let mut commit = self.commits.create(ctx.author.as_ref(), false)?;
        commit.require_previous()?;

        let documents = match outcome {
            PatchOutcome::Fields(updates) => {
                let mut ids = Vec::with_capacity(updates.len());
                for (doc, fields) in docs.iter().zip(updates) {
                    let item = Documents::item_of(doc)?;
                    let merged = merge_fields(doc.clone(), &fields);
                    ids.push(self.persist_version(&mut commit, merged, item)?);
                }
                ids
            }
            PatchOutcome::Written(ids) => ids,
        };
        self.commits.update(commit.id, &commit.base)?;

        Ok(PatchResult { commit: commit.id, documents })
    }

    fn merge_new_version(&self, ctx: &OpContext, item: ItemId, fields: &Fields) -> Result<ItemUpdate> {
        let _guard = self.write_lock.lock();
        self.require_live(item)?;

        let mut commit = self.commits.create(ctx.author.as_ref(), false)?;
        let previous = commit.require_previous()?;
        let old = self.item_in_commit(previous, item)?;
        let merged = merge_fields(old, fields);
        let document = self.persist_version(&mut commit, merged, item)?;
        self.commits.update(commit.id, &commit.base)?;

        tracing::debug!(%item, commit = %commit.id, "updated item");
        Ok(ItemUpdate { commit: commit.id, document })
    }

    /// Mint an item and write its first document version.
    fn insert_item_with_document(
        &self,
        body: &Fields,
        commit: CommitId,
        parent: Option<ItemId>,
        tags: Option<&Tags>,
    ) -> Result<(ItemId, DocumentId)> {
        let item = self.items.add(commit)?;
        let links = match parent {
            Some(parent) => vec![Link::new(parent, OWNED_BY)],
            None => Vec::new(),
        };
        let no_tags = Tags::new();
        let document =
            self.documents.add(body, item, commit, &links, tags.unwrap_or(&no_tags))?;
        Ok((item, document))
    }

    /// Write a new version of `source` with links to all `targets` added
    /// uniquely.
    fn write_links(
        &self,
        commit: &mut CommitDraft,
        source: ItemId,
        targets: &[ItemId],
        kind: &str,
    ) -> Result<DocumentId> {
        self.increment_document(commit, source, |links| {
            for &target in targets {
                push_link_unique(links, Link::new(target, kind));
            }
        })
    }

    /// Take an item's document at the draft's previous commit, let the
    /// callback edit its links, and persist the result as a new version.
    fn increment_document(
        &self,
        commit: &mut CommitDraft,
        item: ItemId,
        edit: impl FnOnce(&mut Vec<Link>),
    ) -> Result<DocumentId> {
        let previous = commit.require_previous()?;
        let mut document = self.item_in_commit(previous, item)?;
        let mut links = Documents::links_of(&document)?;
        edit(&mut links);
        document.insert(FIELD_LINKS.to_string(), serde_json::to_value(&links)?);
        self.persist_version(commit, document, item)
    }

    /// Store a full document (custom and internal fields) as a new
    /// version in the draft commit and point the item's base entry at it.
    fn persist_version(
        &self,
        commit: &mut CommitDraft,
        document: Fields,
        item: ItemId,
    ) -> Result<DocumentId> {
        let links = Documents::links_of(&document)?;
        let tags = Documents::tags_of(&document)?;
        let body = Documents::blank_copy(&document);
        let new_document = self.documents.add(&body, item, commit.id, &links, &tags)?;

        let entry = commit
            .base
            .iter_mut()
            .find(|entry| entry.item == item)
            .ok_or_else(|| StoreError::Runtime(format!("item {item} is not in the commit base")))?;
        entry.document = new_document;
        Ok(new_document)
    }

    fn require_live(&self, item: ItemId) -> Result<DocumentId> {
        self.document_id(item, None)?
            .ok_or_else(|| StoreError::NotFound(format!("item {item} is not in the head commit")))
    }

    fn document_request(
        &self,
        commit_filter: Filter,
        item_filter: Option<Filter>,
        document_filter: Option<&Filter>,
    ) -> Result<Vec<Fields>> {
        let mut stages = vec![
            Stage::Match(commit_filter),
            Stage::Unwind("base".into()),
            Stage::Project(vec![
                ("document".into(), "base.document".into()),
                ("item".into(), "base.item".into()),
            ]),
        ];
        if let Some(filter) = item_filter {
            stages.push(Stage::Match(filter));
        }
        stages.push(Stage::Lookup {
            from: self.items.collection_name().to_string(),
            local_field: "item".into(),
            foreign_field: ID_FIELD.into(),
            target: "item".into(),
        });
        stages.push(Stage::Unwind("item".into()));
        stages.push(Stage::Lookup {
            from: self.documents.collection_name().to_string(),
            local_field: "document".into(),
            foreign_field: ID_FIELD.into(),
            target: "document".into(),
        });
        stages.push(Stage::Unwind("document".into()));
        stages.push(Stage::ReplaceRoot("document".into()));
        if let Some(filter) = document_filter {
            stages.push(Stage::Match(filter.clone()));
        }

        self.commits.aggregate(&stages)
    }
}

fn item_filter(item: ItemId) -> Filter {
    Filter::eq("item", item.0)
}

fn ensure_single(mut results: Vec<Fields>, item: ItemId) -> Result<Fields> {
    match results.len() {
        1 => Ok(results.remove(0)),
        _ => Err(StoreError::NotFound(format!("item {item}"))),
    }
}

/// Reject bodies carrying reserved internal fields.
fn check_body(body: &Fields) -> Result<()> {
    for key in body.keys() {
        if key.starts_with(RESERVED_PREFIX) {
            return Err(StoreError::InternalFields(key.clone()));
        }
    }
    Ok(())
}

/// Merge `over` onto `base`; fields in `over` win.
fn merge_fields(mut base: Fields, over: &Fields) -> Fields {
    for (key, value) in over {
        base.insert(key.clone(), value.clone());
    }
    base
}

/// Add a link unless an equal `(target, kind)` link is already present.
/// Returns whether the link was added.
pub fn push_link_unique(links: &mut Vec<Link>, link: Link) -> bool {
    if links
        .iter()
        .any(|l| l.target == link.target && l.kind == link.kind)
    {
        return false;
    }
    links.push(link);
    true
}

/// Remove the `(target, kind)` link. Returns whether a link was removed.
pub fn remove_link(links: &mut Vec<Link>, target: ItemId, kind: &str) -> bool {
    let before = links.len();
    links.retain(|l| !(l.target == target && l.kind == kind));
    links.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_check_body_rejects_reserved_prefix() {
        assert!(check_body(&fields(json!({"name": "ok"}))).is_ok());
        let err = check_body(&fields(json!({"_links": []}))).unwrap_err();
        assert!(matches!(err, StoreError::InternalFields(f) if f == "_links"));
    }

    #[test]
    fn test_merge_fields_overwrites() {
        let merged = merge_fields(
            fields(json!({"a": 1, "b": 2})),
            &fields(json!({"b": 3, "c": 4})),
        );
        assert_eq!(merged, fields(json!({"a": 1, "b": 3, "c": 4})));
    }

    #[test]
    fn test_push_link_unique() {
        let mut links = vec![Link::new(ItemId(1), OWNS)];
        assert!(!push_link_unique(&mut links, Link::new(ItemId(1), OWNS)));
        assert!(push_link_unique(&mut links, Link::new(ItemId(1), OWNED_BY)));
        assert!(push_link_unique(&mut links, Link::new(ItemId(2), OWNS)));
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn test_remove_link_matches_target_and_kind() {
        let mut links = vec![
            Link::new(ItemId(1), OWNS),
            Link::new(ItemId(1), OWNED_BY),
            Link::new(ItemId(2), OWNS),
        ];
        assert!(remove_link(&mut links, ItemId(1), OWNS));
        assert!(!remove_link(&mut links, ItemId(1), OWNS));
        assert_eq!(
            links,
            vec![Link::new(ItemId(1), OWNED_BY), Link::new(ItemId(2), OWNS)]
        );
    }

    #[test]
    fn test_add_item_writes_head_commit() {
        let db = Database::in_memory();
        let store = Store::new(&db);
        let ctx = OpContext::anonymous();

        let created = store.add_item(&ctx, fields(json!({"name": "root"})), None, None).unwrap();
        assert_eq!(store.head_commit_id().unwrap(), created.commit);
        assert_eq!(
            store.document_id(created.item, None).unwrap(),
            Some(created.document)
        );

        let doc = store.head_item(created.item).unwrap();
        assert_eq!(doc["name"], "root");
        assert_eq!(doc["_commit"], created.commit.0);
    }

    #[test]
    fn test_parent_gets_owns_link() {
        let db = Database::in_memory();
        let store = Store::new(&db);
        let ctx = OpContext::anonymous();

        let parent = store.add_item(&ctx, fields(json!({"name": "p"})), None, None).unwrap();
        let child = store
            .add_item(&ctx, fields(json!({"name": "c"})), Some(parent.item), None)
            .unwrap();
        assert!(child.parent_document.is_some());

        let parent_doc = store.head_item(parent.item).unwrap();
        let links = Documents::links_of(&parent_doc).unwrap();
        assert_eq!(links, vec![Link::new(child.item, OWNS)]);

        let child_doc = store.head_item(child.item).unwrap();
        let links = Documents::links_of(&child_doc).unwrap();
        assert_eq!(links, vec![Link::new(parent.item, OWNED_BY)]);
    }

    #[test]
    fn test_add_item_with_missing_parent_fails() {
        let db = Database::in_memory();
        let store = Store::new(&db);

        let err = store
            .add_item(
                &OpContext::anonymous(),
                fields(json!({})),
                Some(ItemId(1)),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
