//! Newsletter digests: which posts a subscriber gets next, and delivery.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use tracing::{debug, info};

use crate::config::NotionConfig;
use crate::contract::{Digest, DigestPost, Mailer, NotionApi};
use crate::error::Result;
use crate::excerpt::excerpt;
use crate::model::{LocalValue, RecordRef, POST, SUBSCRIBER};
use crate::store::{self, OwnerRef, Store};
use crate::sync::push;

/// Posts older than this are never sent.
pub const DIGEST_WINDOW_DAYS: i64 = 90;
pub const DIGEST_MAX_POSTS: usize = 5;

/// Posts due for `subscriber`: not sent yet, published within the window
/// and not in the future, without any of the subscriber's excluded tags.
/// Oldest first.
pub fn digest_posts(store: &Store, subscriber: i64, now: DateTime<Utc>) -> Result<Vec<DigestPost>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(
        "SELECT p.id FROM posts p \
         WHERE p.published IS NOT NULL \
         AND p.id NOT IN (SELECT target_id FROM subscriber_sent_posts WHERE owner_id = ?1) \
         AND p.id NOT IN ( \
             SELECT pt.owner_id FROM post_tags pt \
             JOIN subscriber_excluded_tags et ON et.target_id = pt.target_id \
             WHERE et.owner_id = ?1)",
    )?;
    let candidates = stmt
        .query_map(params![subscriber], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let since = now - Duration::days(DIGEST_WINDOW_DAYS);
    let mut posts = Vec::new();
    for pk in candidates {
        let record = store::load_record(conn, &POST, pk)?;
        let Some(published) = record.datetime("published") else {
            continue;
        };
        if published < since || published > now {
            continue;
        }
        let blocks = store::blocks_for(conn, OwnerRef::new(&POST, pk))?;
        posts.push(DigestPost {
            pk,
            title: record.text("title").unwrap_or_default().to_string(),
            slug: record.text("slug").unwrap_or_default().to_string(),
            excerpt: excerpt(&record, &blocks),
            published,
        });
    }
    posts.sort_by_key(|p| (p.published, p.pk));
    posts.truncate(DIGEST_MAX_POSTS);
    debug!(subscriber, posts = posts.len(), "Selected digest posts");
    Ok(posts)
}

/// First word of the name, capitalized; "there" when no name is known.
pub fn greeting_name(name: Option<&str>) -> String {
    let Some(first) = name.and_then(|n| n.split_whitespace().next()) else {
        return "there".to_string();
    };
    let mut chars = first.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => "there".to_string(),
    }
}

/// Send the next digest to `subscriber`.
///
/// Returns `Ok(None)` when nothing is due. Otherwise the digest is handed
/// to `mailer`, its posts are recorded as sent and the subscriber is pushed
/// back to the remote workspace.
pub async fn send_digest(
    api: &dyn NotionApi,
    store: &Store,
    config: &NotionConfig,
    mailer: &dyn Mailer,
    subscriber: i64,
    now: DateTime<Utc>,
) -> Result<Option<Digest>> {
    let posts = digest_posts(store, subscriber, now)?;
    if posts.is_empty() {
        debug!(subscriber, "No posts due, skipping digest");
        return Ok(None);
    }

    let record = store.load_record(&SUBSCRIBER, subscriber)?;
    let name = record.text("name").map(str::to_string);
    let digest = Digest {
        greeting_name: greeting_name(name.as_deref()),
        recipient_name: name,
        recipient_email: record.text("email").unwrap_or_default().to_string(),
        posts,
    };
    mailer.send_digest(&digest).await?;
    info!(subscriber, email = %digest.recipient_email, posts = digest.posts.len(), "Digest sent");

    let mut sent = match record.get("sent_posts") {
        LocalValue::Records(records) => records.clone(),
        _ => Default::default(),
    };
    for post in &digest.posts {
        let notion_id = store.load_record(&POST, post.pk)?.notion_id;
        sent.insert(RecordRef {
            model: POST.name,
            pk: post.pk,
            notion_id,
        });
    }
    if let Some(field) = SUBSCRIBER.field("sent_posts") {
        store::set_relation(store.conn(), field, subscriber, &LocalValue::Records(sent))?;
    }

    push(api, store, config, &SUBSCRIBER, subscriber).await?;
    Ok(Some(digest))
}

/// Batch run over every subscriber in primary key order. Subscribers with
/// nothing due are skipped; the first failure stops the run.
pub async fn send_all_digests(
    api: &dyn NotionApi,
    store: &Store,
    config: &NotionConfig,
    mailer: &dyn Mailer,
    now: DateTime<Utc>,
) -> Result<Vec<Digest>> {
    let subscribers = store.record_pks(&SUBSCRIBER)?;
    let mut sent = Vec::new();
    for subscriber in &subscribers {
        if let Some(digest) = send_digest(api, store, config, mailer, *subscriber, now).await? {
            sent.push(digest);
        }
    }
    info!(subscribers = subscribers.len(), sent = sent.len(), "Digest run complete");
    Ok(sent)
}
