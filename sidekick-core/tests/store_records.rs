use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use serde_json::json;
use sidekick_core::model::{LocalRecord, LocalValue, RecordRef, PAGE, POST, SUBSCRIBER};
use sidekick_core::store::{self, LocalBlock, OwnerRef, Store};
use sidekick_core::SyncError;
use tempfile::TempDir;
use uuid::Uuid;

fn post(slug: &str) -> LocalRecord {
    let mut record = LocalRecord::new(Some(Uuid::new_v4()));
    record.set("title", LocalValue::Text(format!("Post {slug}")));
    record.set("slug", LocalValue::Text(slug.to_string()));
    record.set("status", LocalValue::Text("published".into()));
    record.set(
        "published",
        LocalValue::DateTime(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
    );
    record
}

fn save_post(store: &Store, slug: &str) -> i64 {
    let mut record = post(slug);
    store::save_record(store.conn(), &POST, &mut record).unwrap()
}

fn save_subscriber(store: &Store, email: &str) -> i64 {
    let mut record = LocalRecord::new(None);
    record.set("email", LocalValue::Text(email.into()));
    record.set(
        "subscribed",
        LocalValue::DateTime(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
    );
    store::save_record(store.conn(), &SUBSCRIBER, &mut record).unwrap()
}

fn validation_field(err: SyncError) -> String {
    match err {
        SyncError::Validation { field, .. } => field,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn open_is_idempotent_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sidekick.sqlite3");
    {
        let store = Store::open(&path).unwrap();
        save_post(&store, "kept");
    }
    let store = Store::open(&path).unwrap();
    assert_eq!(store.record_pks(&POST).unwrap().len(), 1);
}

#[test]
fn saved_records_load_back() {
    let store = Store::open_in_memory().unwrap();
    let mut record = post("hello-world");
    let pk = store::save_record(store.conn(), &POST, &mut record).unwrap();
    assert_eq!(record.pk, Some(pk));

    let loaded = store.load_record(&POST, pk).unwrap();
    assert_eq!(loaded.notion_id, record.notion_id);
    assert_eq!(loaded.text("slug"), Some("hello-world"));
    assert_eq!(loaded.datetime("published"), record.datetime("published"));
    assert_eq!(loaded.get("subtitle"), &LocalValue::Null);
    assert_eq!(loaded.get("tags"), &LocalValue::Names(vec![]));

    let by_remote = store
        .find_by_notion_id(&POST, record.notion_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(by_remote.pk, Some(pk));
}

#[test]
fn missing_record_is_reported() {
    let store = Store::open_in_memory().unwrap();
    assert!(matches!(
        store.load_record(&PAGE, 42),
        Err(SyncError::RecordNotFound { pk: 42, .. })
    ));
}

#[test]
fn field_rules_are_enforced() {
    let store = Store::open_in_memory().unwrap();
    let conn = store.conn();

    let mut bad_slug = post("not a slug!");
    let err = store::full_clean(conn, &POST, &bad_slug).unwrap_err();
    assert_eq!(validation_field(err), "slug");
    bad_slug.set("slug", LocalValue::Text("a-slug".into()));
    store::full_clean(conn, &POST, &bad_slug).unwrap();

    let mut long_title = post("long");
    long_title.set("title", LocalValue::Text("x".repeat(101)));
    assert_eq!(validation_field(store::full_clean(conn, &POST, &long_title).unwrap_err()), "title");

    let mut no_status = post("no-status");
    no_status.set("status", LocalValue::Text(String::new()));
    assert_eq!(validation_field(store::full_clean(conn, &POST, &no_status).unwrap_err()), "status");

    let mut subscriber = LocalRecord::new(None);
    subscriber.set("email", LocalValue::Text("not-an-email".into()));
    subscriber.set("subscribed", LocalValue::DateTime(Utc::now()));
    assert_eq!(
        validation_field(store::full_clean(conn, &SUBSCRIBER, &subscriber).unwrap_err()),
        "email"
    );
}

#[test]
fn unique_fields_ignore_the_record_itself() {
    let store = Store::open_in_memory().unwrap();
    let conn = store.conn();
    let pk = save_post(&store, "taken");

    let clash = post("taken");
    assert_eq!(validation_field(store::full_clean(conn, &POST, &clash).unwrap_err()), "slug");

    let mut same = store.load_record(&POST, pk).unwrap();
    same.set("title", LocalValue::Text("Renamed".into()));
    store::full_clean(conn, &POST, &same).unwrap();
    store::save_record(conn, &POST, &mut same).unwrap();
    assert_eq!(store.load_record(&POST, pk).unwrap().text("title"), Some("Renamed"));
}

#[test]
fn tag_relations_are_replaced_in_full() {
    let store = Store::open_in_memory().unwrap();
    let conn = store.conn();
    let pk = save_post(&store, "tagged");
    let tags = POST.field("tags").unwrap();

    store::set_relation(conn, tags, pk, &LocalValue::Names(vec!["b".into(), "a".into()])).unwrap();
    assert_eq!(
        store.load_record(&POST, pk).unwrap().get("tags"),
        &LocalValue::Names(vec!["a".into(), "b".into()])
    );

    store::set_relation(conn, tags, pk, &LocalValue::Names(vec!["c".into(), "b".into()])).unwrap();
    assert_eq!(
        store.load_record(&POST, pk).unwrap().get("tags"),
        &LocalValue::Names(vec!["b".into(), "c".into()])
    );

    store::set_relation(conn, tags, pk, &LocalValue::Null).unwrap();
    assert_eq!(store.load_record(&POST, pk).unwrap().get("tags"), &LocalValue::Names(vec![]));

    // Unlinked tags stay available.
    let tag_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
        .unwrap();
    assert_eq!(tag_count, 3);
}

#[test]
fn relation_values_of_the_wrong_kind_are_rejected() {
    let store = Store::open_in_memory().unwrap();
    let conn = store.conn();
    let subscriber = save_subscriber(&store, "reader@example.com");
    let sent_posts = SUBSCRIBER.field("sent_posts").unwrap();

    assert!(matches!(
        store::set_relation(conn, sent_posts, subscriber, &LocalValue::Text("news".into())),
        Err(SyncError::UnrecognizedRelationValue { ref field, .. }) if field == "sent_posts"
    ));

    let wrong_model: BTreeSet<RecordRef> = [RecordRef {
        model: PAGE.name,
        pk: 1,
        notion_id: None,
    }]
    .into_iter()
    .collect();
    assert!(matches!(
        store::set_relation(conn, sent_posts, subscriber, &LocalValue::Records(wrong_model)),
        Err(SyncError::UnrecognizedRelationValue { .. })
    ));
}

#[test]
fn blocks_keep_display_order_and_validate_type() {
    let store = Store::open_in_memory().unwrap();
    let conn = store.conn();
    let owner = OwnerRef::new(&POST, save_post(&store, "blocks"));
    let make = |ordering: i64, text: &str| {
        let mut block = LocalBlock {
            id: None,
            owner_type: owner.owner_type.to_string(),
            owner_id: owner.owner_id,
            notion_id: Uuid::new_v4(),
            ordering,
            block_type: "paragraph".to_string(),
            properties: json!({ "text": text, "children": [] }),
        };
        store::save_block(conn, &mut block).unwrap();
        block
    };
    let second = make(1, "second");
    let first = make(0, "first");

    let stored = store.blocks_for(owner).unwrap();
    assert_eq!(stored, vec![first.clone(), second.clone()]);
    assert_eq!(store::find_block(conn, first.notion_id).unwrap(), Some(first.clone()));

    let removed = store::prune_blocks(conn, owner, &[first.id.unwrap()]).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(store.blocks_for(owner).unwrap(), vec![first]);

    let mut untyped = LocalBlock {
        block_type: String::new(),
        ..second
    };
    untyped.id = None;
    assert_eq!(validation_field(store::save_block(conn, &mut untyped).unwrap_err()), "type");
}

#[test]
fn users_are_found_by_email_case_insensitively() {
    let store = Store::open_in_memory().unwrap();
    let pk = store.create_user("Ada@Example.com", Some("Ada")).unwrap();
    assert_eq!(store.find_user_by_email("ada@example.com").unwrap(), Some(pk));
    assert_eq!(store.find_user_by_email("bob@example.com").unwrap(), None);
}

#[test]
fn pruning_a_record_removes_everything_hanging_off_it() {
    let store = Store::open_in_memory().unwrap();
    let conn = store.conn();
    let gone = save_post(&store, "gone");
    let kept = save_post(&store, "kept");
    let owner = OwnerRef::new(&POST, gone);

    store::set_relation(conn, POST.field("tags").unwrap(), gone, &LocalValue::Names(vec!["x".into()]))
        .unwrap();
    let mut block = LocalBlock {
        id: None,
        owner_type: owner.owner_type.to_string(),
        owner_id: gone,
        notion_id: Uuid::new_v4(),
        ordering: 0,
        block_type: "divider".to_string(),
        properties: json!({}),
    };
    store::save_block(conn, &mut block).unwrap();
    store::create_attachment(conn, owner, "https://s3.example.com/a.png", "newsletter/1/a.png").unwrap();

    let subscriber = save_subscriber(&store, "reader@example.com");
    let sent: BTreeSet<RecordRef> = [gone, kept]
        .into_iter()
        .map(|pk| RecordRef {
            model: POST.name,
            pk,
            notion_id: None,
        })
        .collect();
    store::set_relation(conn, SUBSCRIBER.field("sent_posts").unwrap(), subscriber, &LocalValue::Records(sent))
        .unwrap();

    let pruned = store::prune_records(conn, &POST, &[kept]).unwrap();

    assert_eq!(pruned, 1);
    assert_eq!(store.record_pks(&POST).unwrap(), vec![kept]);
    assert!(store.blocks_for(owner).unwrap().is_empty());
    assert!(store.attachments_for(owner).unwrap().is_empty());
    let links: i64 = conn
        .query_row("SELECT COUNT(*) FROM post_tags", [], |row| row.get(0))
        .unwrap();
    assert_eq!(links, 0);
    match store.load_record(&SUBSCRIBER, subscriber).unwrap().get("sent_posts") {
        LocalValue::Records(records) => {
            let pks: Vec<i64> = records.iter().map(|r| r.pk).collect();
            assert_eq!(pks, vec![kept]);
        }
        other => panic!("expected records, got {other:?}"),
    }
}
