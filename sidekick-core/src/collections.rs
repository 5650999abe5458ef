//! Per-collection sync settings and the batch job that syncs them all.

use tracing::{info, warn};

use crate::attachment::{MediaMirror, MediaStorage};
use crate::config::NotionConfig;
use crate::contract::{MediaFetcher, NotionApi};
use crate::error::{Result, SyncError};
use crate::model::{schema_for, slugify, LocalRecord, LocalValue, ModelSchema, PAGE, POST, SUBSCRIBER};
use crate::property::parse_date;
use crate::remote::RemoteRecord;
use crate::store::Store;
use crate::sync::{to_model, SyncHooks, SyncReport};

pub type CleanFn = fn(&mut LocalRecord, &RemoteRecord) -> Result<()>;

/// How one collection is synced.
#[derive(Clone, Copy)]
pub struct CollectionSync {
    pub schema: &'static ModelSchema,
    pub before_clean: CleanFn,
    /// Storage directory for mirrored media; `None` for collections
    /// without content blocks.
    pub media_prefix: Option<&'static str>,
}

/// Posts and pages: slug from the title and `draft` status unless set.
pub fn default_slug_and_status(record: &mut LocalRecord, _remote: &RemoteRecord) -> Result<()> {
    if record.text("slug").is_none() {
        let title = record.text("title").unwrap_or_default();
        record.set("slug", LocalValue::Text(slugify(title)));
    }
    if record.text("status").is_none() {
        record.set("status", LocalValue::Text("draft".to_string()));
    }
    Ok(())
}

/// Subscribers: subscription date is when the remote row was created.
pub fn subscribed_from_created_time(record: &mut LocalRecord, remote: &RemoteRecord) -> Result<()> {
    let created = remote.created_time.as_deref().ok_or_else(|| {
        SyncError::MalformedDocument(format!("record {} has no created_time", remote.id))
    })?;
    let subscribed = parse_date(created).ok_or_else(|| {
        SyncError::MalformedDocument(format!("bad created_time '{created}' on {}", remote.id))
    })?;
    record.set("subscribed", LocalValue::DateTime(subscribed));
    Ok(())
}

pub static POSTS: CollectionSync = CollectionSync {
    schema: &POST,
    before_clean: default_slug_and_status,
    media_prefix: Some("newsletter"),
};

pub static PAGES: CollectionSync = CollectionSync {
    schema: &PAGE,
    before_clean: default_slug_and_status,
    media_prefix: Some("pages"),
};

pub static SUBSCRIBERS: CollectionSync = CollectionSync {
    schema: &SUBSCRIBER,
    before_clean: subscribed_from_created_time,
    media_prefix: None,
};

/// Sync settings for a collection identifier such as `newsletter.Post`.
pub fn preset(collection: &str) -> Result<CollectionSync> {
    let schema =
        schema_for(collection).ok_or_else(|| SyncError::CollectionNotConfigured(collection.to_string()))?;
    [POSTS, PAGES, SUBSCRIBERS]
        .into_iter()
        .find(|p| p.schema == schema)
        .ok_or_else(|| SyncError::CollectionNotConfigured(collection.to_string()))
}

impl CollectionSync {
    /// Run [`to_model`] for this collection with its hook and media settings.
    pub async fn sync(
        &self,
        api: &dyn NotionApi,
        store: &mut Store,
        config: &NotionConfig,
        storage: &MediaStorage,
        fetcher: &dyn MediaFetcher,
    ) -> Result<SyncReport> {
        let mirror = self
            .media_prefix
            .map(|prefix| MediaMirror::new(storage, fetcher, prefix));
        let hooks = SyncHooks {
            before_clean: Some(&self.before_clean),
            media: mirror.as_ref(),
        };
        to_model(api, store, config, self.schema, &hooks).await
    }
}

/// Sync every configured collection, in configuration order.
pub async fn sync_all(
    api: &dyn NotionApi,
    store: &mut Store,
    config: &NotionConfig,
    storage: &MediaStorage,
    fetcher: &dyn MediaFetcher,
) -> Result<Vec<SyncReport>> {
    if config.databases.is_empty() {
        warn!("[SYNC] No collections configured, nothing to sync");
    }
    let mut reports = Vec::with_capacity(config.databases.len());
    for collection in config.collections() {
        let report = preset(collection)?
            .sync(api, store, config, storage, fetcher)
            .await?;
        reports.push(report);
    }
    info!(collections = reports.len(), "[SYNC] All collections synced");
    Ok(reports)
}
