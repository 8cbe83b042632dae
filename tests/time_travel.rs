//! Head resets and reading old snapshots.

use serde_json::json;
use snapbase::{Database, Fields, OpContext, Store};

fn body(value: serde_json::Value) -> Fields {
    value.as_object().unwrap().clone()
}

#[test]
fn test_old_commits_stay_readable() {
    let db = Database::in_memory();
    let store = Store::new(&db);
    let ctx = OpContext::anonymous();

    let created = store.add_item(&ctx, body(json!({"v": 0})), None, None).unwrap();
    let mut commits = vec![created.commit];
    for v in 1..5 {
        let update = store.update_item(&ctx, created.item, body(json!({"v": v}))).unwrap();
        commits.push(update.commit);
    }

    for (v, commit) in commits.iter().enumerate() {
        let doc = store.item_in_commit(*commit, created.item).unwrap();
        assert_eq!(doc["v"], v);
    }
    assert_eq!(store.head_item(created.item).unwrap()["v"], 4);
}

#[test]
fn test_reset_head_moves_reads() {
    let db = Database::in_memory();
    let store = Store::new(&db);
    let ctx = OpContext::anonymous();

    let a = store.add_item(&ctx, body(json!({"name": "a"})), None, None).unwrap();
    let b = store.add_item(&ctx, body(json!({"name": "b"})), None, None).unwrap();

    store.reset_head(Some(a.commit)).unwrap();
    assert_eq!(store.head_commit_id().unwrap(), a.commit);

    // b exists as an item but is not in the head snapshot anymore.
    let heads = store.head_items(None).unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0]["name"], "a");
    assert_eq!(store.document_id(b.item, None).unwrap(), None);
    assert_eq!(store.document_id(b.item, Some(b.commit)).unwrap(), Some(b.document));
}

#[test]
fn test_write_after_reset_starts_a_branch() {
    let db = Database::in_memory();
    let store = Store::new(&db);
    let ctx = OpContext::anonymous();

    let a = store.add_item(&ctx, body(json!({"name": "a", "v": 0})), None, None).unwrap();
    let b = store.add_item(&ctx, body(json!({"name": "b"})), None, None).unwrap();

    store.reset_head(Some(a.commit)).unwrap();
    let update = store.update_item(&ctx, a.item, body(json!({"v": 1}))).unwrap();

    // The new commit builds on the reset head, not on the orphaned tip.
    let head = store.commit(None).unwrap();
    assert_eq!(head.id, update.commit);
    assert_eq!(head.previous, Some(a.commit));

    // b stays orphaned on the abandoned branch.
    assert_eq!(store.document_id(b.item, None).unwrap(), None);
    assert_eq!(store.document_id(b.item, Some(b.commit)).unwrap(), Some(b.document));
}

#[test]
fn test_reset_without_commit_goes_to_latest() {
    let db = Database::in_memory();
    let store = Store::new(&db);
    let ctx = OpContext::anonymous();

    let a = store.add_item(&ctx, body(json!({"name": "a"})), None, None).unwrap();
    let b = store.add_item(&ctx, body(json!({"name": "b"})), None, None).unwrap();

    store.reset_head(Some(a.commit)).unwrap();
    let latest = store.reset_head(None).unwrap();

    // The most recently created commit wins, even though it was orphaned.
    assert_eq!(latest, b.commit);
    assert_eq!(store.head_commit_id().unwrap(), b.commit);
    assert!(store.document_id(b.item, None).unwrap().is_some());
}

#[test]
fn test_reset_revives_deleted_item() {
    let db = Database::in_memory();
    let store = Store::new(&db);
    let ctx = OpContext::anonymous();

    let a = store.add_item(&ctx, body(json!({"name": "a"})), None, None).unwrap();
    let before_delete = store.head_commit_id().unwrap();
    store.delete_item(&ctx, a.item).unwrap();
    assert_eq!(store.document_id(a.item, None).unwrap(), None);

    store.reset_head(Some(before_delete)).unwrap();
    assert_eq!(store.document_id(a.item, None).unwrap(), Some(a.document));

    // The revived item accepts writes again.
    assert!(store.update_item(&ctx, a.item, body(json!({"v": 1}))).is_ok());
}
