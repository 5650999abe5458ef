#![allow(dead_code)]

//! Fixtures shared by the integration tests: remote documents and a
//! `MockNotionApi` backed by an in-memory workspace that tests can edit
//! between sync passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sidekick_core::config::{DatabaseMapping, NotionConfig};
use sidekick_core::contract::MockNotionApi;
use sidekick_core::remote::{Paginated, Person, RemoteUser};
use sidekick_core::Result;

pub const POSTS_DB: &str = "posts-db";
pub const PAGES_DB: &str = "pages-db";
pub const SUBSCRIBERS_DB: &str = "subscribers-db";
pub const AUTHOR_ID: &str = "remote-user-1";
pub const AUTHOR_EMAIL: &str = "ada@example.com";

pub fn config() -> NotionConfig {
    NotionConfig {
        api_key: "secret".to_string(),
        databases: vec![
            DatabaseMapping {
                collection: "newsletter.Post".to_string(),
                database_id: POSTS_DB.to_string(),
            },
            DatabaseMapping {
                collection: "newsletter.Subscriber".to_string(),
                database_id: SUBSCRIBERS_DB.to_string(),
            },
            DatabaseMapping {
                collection: "front.Page".to_string(),
                database_id: PAGES_DB.to_string(),
            },
        ],
    }
}

/// Deterministic remote id.
pub fn id(n: u32) -> String {
    format!("00000000-0000-4000-8000-{n:012}")
}

pub fn run(text: &str) -> Value {
    json!({
        "type": "text",
        "plain_text": text,
        "text": { "content": text, "link": null },
        "annotations": { "bold": false, "italic": false, "code": false }
    })
}

pub fn title(text: &str) -> Value {
    json!({ "id": "title", "type": "title", "title": [run(text)] })
}

pub fn rich_text(prop_id: &str, text: &str) -> Value {
    json!({ "id": prop_id, "type": "rich_text", "rich_text": [run(text)] })
}

pub fn status(name: &str) -> Value {
    json!({ "id": "st", "type": "status", "status": { "name": name } })
}

pub fn date(start: &str) -> Value {
    json!({ "id": "pub", "type": "date", "date": { "start": start, "end": null } })
}

pub fn multi_select(prop_id: &str, names: &[&str]) -> Value {
    let options: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
    json!({ "id": prop_id, "type": "multi_select", "multi_select": options })
}

pub fn relation(prop_id: &str, ids: &[String]) -> Value {
    let items: Vec<Value> = ids.iter().map(|i| json!({ "id": i })).collect();
    json!({ "id": prop_id, "type": "relation", "relation": items })
}

/// A post row with title, status, publication date and tags.
pub fn post(n: u32, name: &str, tags: &[&str]) -> Value {
    json!({
        "id": id(n),
        "created_time": "2024-05-01T10:00:00.000Z",
        "created_by": { "id": AUTHOR_ID },
        "properties": {
            "Name": title(name),
            "Status": status("published"),
            "Published": date("2024-05-01"),
            "Tags": multi_select("tg", tags),
        }
    })
}

pub fn subscriber(n: u32, email: &str, name: &str, sent: &[String], excluded: &[&str]) -> Value {
    json!({
        "id": id(n),
        "created_time": "2024-04-02T08:30:00.000Z",
        "created_by": { "id": AUTHOR_ID },
        "properties": {
            "Name": title(name),
            "Email": { "id": "em", "type": "email", "email": email },
            "Sent Posts": relation("sp", sent),
            "Excluded Tags": multi_select("ex", excluded),
        }
    })
}

pub fn paragraph(n: u32, text: &str) -> Value {
    json!({
        "id": id(n),
        "type": "paragraph",
        "has_children": false,
        "paragraph": { "rich_text": [run(text)], "color": "default" }
    })
}

pub fn bullet(n: u32, text: &str) -> Value {
    json!({
        "id": id(n),
        "type": "bulleted_list_item",
        "has_children": false,
        "bulleted_list_item": { "rich_text": [run(text)] }
    })
}

pub fn image(n: u32, url: &str, caption: &str) -> Value {
    json!({
        "id": id(n),
        "type": "image",
        "has_children": false,
        "image": {
            "type": "file",
            "caption": [run(caption)],
            "file": { "url": url, "expiry_time": "2024-05-01T11:00:00.000Z" }
        }
    })
}

/// Paginates `all` with integer-offset cursors.
fn page<T: DeserializeOwned>(all: &[Value], cursor: Option<String>, size: usize) -> Result<Paginated<T>> {
    let start = cursor.map(|c| c.parse::<usize>().unwrap()).unwrap_or(0);
    let end = (start + size).min(all.len());
    let results = all[start..end]
        .iter()
        .map(|v| serde_json::from_value(v.clone()).unwrap())
        .collect();
    let has_more = end < all.len();
    Ok(Paginated {
        results,
        has_more,
        next_cursor: has_more.then(|| end.to_string()),
    })
}

/// Remote state served by [`Workspace::api`]. Clones share the same state.
#[derive(Clone)]
pub struct Workspace {
    pub records: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    pub children: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    pub queries: Arc<Mutex<usize>>,
    pub page_size: usize,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            records: Default::default(),
            children: Default::default(),
            queries: Default::default(),
            page_size: 100,
        }
    }
}

impl Workspace {
    pub fn set_records(&self, database_id: &str, records: Vec<Value>) {
        self.records
            .lock()
            .unwrap()
            .insert(database_id.to_string(), records);
    }

    pub fn set_children(&self, block_id: &str, children: Vec<Value>) {
        self.children
            .lock()
            .unwrap()
            .insert(block_id.to_string(), children);
    }

    pub fn query_count(&self) -> usize {
        *self.queries.lock().unwrap()
    }

    /// A mock answering queries, block listings and user lookups from this
    /// workspace. Write endpoints are left unconfigured.
    pub fn api(&self) -> MockNotionApi {
        let mut api = MockNotionApi::new();
        let size = self.page_size;

        let records = self.records.clone();
        let queries = self.queries.clone();
        api.expect_query_database().returning(move |database_id, cursor| {
            *queries.lock().unwrap() += 1;
            let all = records
                .lock()
                .unwrap()
                .get(database_id)
                .cloned()
                .unwrap_or_default();
            page(&all, cursor, size)
        });

        let children = self.children.clone();
        api.expect_list_block_children().returning(move |block_id, cursor| {
            let all = children
                .lock()
                .unwrap()
                .get(block_id)
                .cloned()
                .unwrap_or_default();
            page(&all, cursor, size)
        });

        api.expect_retrieve_user().returning(|user_id| {
            Ok(RemoteUser {
                id: user_id.to_string(),
                name: Some("Ada Lovelace".to_string()),
                person: Some(Person {
                    email: Some(AUTHOR_EMAIL.to_string()),
                }),
            })
        });

        api
    }
}
