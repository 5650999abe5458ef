//! Sync engine: remote database rows ⇄ local records.
//!
//! The forward direction ([`to_model`]) mirrors one configured collection:
//! every remote row is upserted in its own IMMEDIATE transaction (properties,
//! author, relations, content blocks, media), and local rows that no longer
//! exist remotely are pruned once the whole collection has been read.
//!
//! The reverse direction ([`from_model`], [`push`]) writes one local record's
//! fields back to its remote page, creating the page when the record has
//! never been synced.
//!
//! Everything is awaited in sequence. The open transaction is borrowed
//! across awaits, so these futures are not `Send` and must be driven
//! directly by the runtime (`#[tokio::main]` / `#[tokio::test]`), never
//! spawned.

use std::collections::HashMap;
use std::pin::pin;

use futures::TryStreamExt;
use rusqlite::Connection;
use serde_json::Map;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::attachment::MediaMirror;
use crate::block::{fetch_children, BlockConverter};
use crate::config::NotionConfig;
use crate::contract::{MediaHandler, NotionApi};
use crate::error::{Result, SyncError};
use crate::model::{field_name, FieldSpec, LocalRecord, LocalValue, ModelSchema};
use crate::property::{Property, PropertyKind};
use crate::remote::{paginate, RemoteRecord};
use crate::store::{self, CollectionLookup, LocalBlock, OwnerRef, Store};

/// Pre-save hook: adjusts the record after conversion, before validation.
pub type BeforeClean<'h> = &'h dyn Fn(&mut LocalRecord, &RemoteRecord) -> Result<()>;

/// Optional per-collection behaviour for [`to_model`].
#[derive(Default)]
pub struct SyncHooks<'h> {
    pub before_clean: Option<BeforeClean<'h>>,
    /// Media mirroring for image and uploaded video blocks. Without it,
    /// such blocks fail with [`SyncError::MediaHandlerMissing`].
    pub media: Option<&'h MediaMirror<'h>>,
}

/// Outcome of one collection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub collection: String,
    /// Primary keys of every record seen in this pass, in remote order.
    pub synced: Vec<i64>,
    pub pruned: usize,
}

/// Remote user id → local user pk, for the duration of one pass.
#[derive(Default)]
struct UserCache {
    users: HashMap<String, i64>,
}

impl UserCache {
    async fn resolve(&mut self, api: &dyn NotionApi, conn: &Connection, notion_id: &str) -> Result<i64> {
        if let Some(pk) = self.users.get(notion_id) {
            return Ok(*pk);
        }
        let user = api.retrieve_user(notion_id).await?;
        let email = user.person.and_then(|p| p.email).unwrap_or_default();
        let pk = match store::find_user_by_email(conn, &email)? {
            Some(pk) if !email.is_empty() => pk,
            _ => {
                return Err(SyncError::UserNotFound {
                    notion_id: notion_id.to_string(),
                    email,
                })
            }
        };
        debug!(notion_id, email = %email, pk, "Resolved author");
        self.users.insert(notion_id.to_string(), pk);
        Ok(pk)
    }
}

/// Mirror the remote collection configured for `schema` into the store.
pub async fn to_model(
    api: &dyn NotionApi,
    store: &mut Store,
    config: &NotionConfig,
    schema: &'static ModelSchema,
    hooks: &SyncHooks<'_>,
) -> Result<SyncReport> {
    let database_id = config.database_id(schema.name)?;
    info!(collection = schema.name, database_id, "[SYNC] Starting collection sync");

    let mut users = UserCache::default();
    let mut synced: Vec<i64> = Vec::new();
    let mut records = pin!(paginate(move |cursor| api.query_database(database_id, cursor)));

    while let Some(remote) = records.try_next().await.inspect_err(|e| {
        error!(collection = schema.name, error = %e, "[SYNC][ERROR] Failed to query database");
    })? {
        let tx = store.transaction()?;
        match sync_record(api, &tx, config, schema, hooks, &mut users, &remote).await {
            Ok(pk) => {
                tx.commit()?;
                info!(collection = schema.name, notion_id = %remote.id, pk, "[SYNC] Record synced");
                synced.push(pk);
            }
            Err(e) => {
                error!(
                    collection = schema.name,
                    notion_id = %remote.id,
                    error = %e,
                    "[SYNC][ERROR] Record sync failed, rolling back"
                );
                return Err(e);
            }
        }
    }

    let tx = store.transaction()?;
    let pruned = store::prune_records(&tx, schema, &synced)?;
    tx.commit()?;
    if pruned > 0 {
        info!(collection = schema.name, pruned, "[SYNC] Pruned records missing remotely");
    }
    info!(collection = schema.name, records = synced.len(), "[SYNC] Collection sync complete");

    Ok(SyncReport {
        collection: schema.name.to_string(),
        synced,
        pruned,
    })
}

async fn sync_record(
    api: &dyn NotionApi,
    conn: &Connection,
    config: &NotionConfig,
    schema: &'static ModelSchema,
    hooks: &SyncHooks<'_>,
    users: &mut UserCache,
    remote: &RemoteRecord,
) -> Result<i64> {
    let notion_id = remote.notion_id()?;
    let mut record = store::find_by_notion_id(conn, schema, notion_id)?
        .unwrap_or_else(|| LocalRecord::new(Some(notion_id)));

    let lookup = CollectionLookup::for_collections(conn, config.collections());
    let mut deferred: Vec<(&'static FieldSpec, LocalValue)> = Vec::new();
    for (name, document) in &remote.properties {
        let property = Property::parse(name, document);
        let value = property.to_local(&lookup)?;

        if property.kind == PropertyKind::Title && schema.has_field("title") {
            record.set("title", value);
            continue;
        }
        match schema.field_for_property(name) {
            Some(field) if field.is_relation() => deferred.push((field, value)),
            Some(field) => record.set(field.name, value),
            None => debug!(property = %name, "No matching field, skipping property"),
        }
    }

    if schema.has_field("author") {
        let created_by = remote.created_by.as_ref().ok_or_else(|| {
            SyncError::MalformedDocument(format!("record {} has no created_by", remote.id))
        })?;
        let author = users.resolve(api, conn, &created_by.id).await?;
        record.set("author", LocalValue::Integer(author));
    }

    if let Some(before_clean) = hooks.before_clean {
        before_clean(&mut record, remote)?;
    }

    store::full_clean(conn, schema, &record)?;
    let pk = store::save_record(conn, schema, &mut record)?;

    for (field, value) in &deferred {
        store::set_relation(conn, field, pk, value)?;
    }

    if schema.has_blocks {
        sync_blocks(api, conn, schema, hooks, pk, remote).await?;
    }
    Ok(pk)
}

async fn sync_blocks(
    api: &dyn NotionApi,
    conn: &Connection,
    schema: &'static ModelSchema,
    hooks: &SyncHooks<'_>,
    pk: i64,
    remote: &RemoteRecord,
) -> Result<()> {
    let owner = OwnerRef::new(schema, pk);
    let media = hooks.media.map(|mirror| mirror.for_record(conn, owner));
    let converter = BlockConverter::new(api, media.as_ref().map(|m| m as &dyn MediaHandler));

    let children = fetch_children(api, &remote.id).await?;
    let mut keep = Vec::with_capacity(children.len());
    for (ordering, child) in children.iter().enumerate() {
        let notion_id = child.notion_id()?;
        let properties = converter.convert(child).await.inspect_err(|e| {
            let definition = serde_json::to_string_pretty(child).unwrap_or_default();
            error!(block_id = %child.id, error = %e, definition = %definition, "[SYNC][ERROR] Could not convert block");
        })?;

        let mut block = match store::find_block(conn, notion_id)? {
            Some(existing) => {
                if existing.owner_type != owner.owner_type || existing.owner_id != owner.owner_id {
                    warn!(block_id = %child.id, pk, "Block moved to another record, re-parenting");
                }
                existing
            }
            None => LocalBlock {
                id: None,
                owner_type: owner.owner_type.to_string(),
                owner_id: owner.owner_id,
                notion_id,
                ordering: 0,
                block_type: String::new(),
                properties: serde_json::Value::Null,
            },
        };
        block.owner_type = owner.owner_type.to_string();
        block.owner_id = owner.owner_id;
        block.ordering = ordering as i64;
        block.block_type = child.kind.clone();
        block.properties = properties;
        keep.push(store::save_block(conn, &mut block)?);
    }

    let removed = store::prune_blocks(conn, owner, &keep)?;
    debug!(pk, blocks = keep.len(), removed, "Synced blocks");
    Ok(())
}

/// Write a local record's fields to its remote page and return the page id.
///
/// Every property declared on the remote database is matched to the local
/// field of the same (snake-cased) name; unmatched properties and null
/// values are left out. The page is updated when the record already has a
/// remote id and created in the collection's database otherwise.
pub async fn from_model(
    api: &dyn NotionApi,
    conn: &Connection,
    config: &NotionConfig,
    schema: &'static ModelSchema,
    pk: i64,
) -> Result<Uuid> {
    let database_id = config.database_id(schema.name)?;
    let database = api.retrieve_database(database_id).await?;
    let record = store::load_record(conn, schema, pk)?;

    let mut properties = Map::new();
    for (name, definition) in &database.properties {
        let property = Property::parse(name, definition);
        property.ensure_supported()?;
        let Some(field) = schema.field(&field_name(name)) else {
            continue;
        };
        let value = record.get(field.name);
        if value.is_null() {
            continue;
        }
        let key = definition.id.clone().unwrap_or_else(|| name.clone());
        properties.insert(key, property.from_local(value)?);
    }
    debug!(collection = schema.name, pk, properties = properties.len(), "Built remote properties");

    match record.notion_id {
        Some(notion_id) => {
            api.update_page(&notion_id.to_string(), properties).await?;
            info!(collection = schema.name, pk, notion_id = %notion_id, "[SYNC] Updated remote page");
            Ok(notion_id)
        }
        None => {
            let page = api.create_page(database_id, properties).await?;
            let notion_id = page.notion_id()?;
            info!(collection = schema.name, pk, notion_id = %notion_id, "[SYNC] Created remote page");
            Ok(notion_id)
        }
    }
}

/// [`from_model`], then remember a newly created remote id locally.
pub async fn push(
    api: &dyn NotionApi,
    store: &Store,
    config: &NotionConfig,
    schema: &'static ModelSchema,
    pk: i64,
) -> Result<Uuid> {
    let notion_id = from_model(api, store.conn(), config, schema, pk).await?;
    let known = store.load_record(schema, pk)?.notion_id;
    if known != Some(notion_id) {
        store.set_notion_id(schema, pk, notion_id)?;
    }
    Ok(notion_id)
}
