//! SQLite-backed local datastore.
//!
//! [`Store`] owns the connection. Everything the sync engine does inside a
//! per-record transaction goes through the free functions below, which take
//! a plain `&Connection` (a `rusqlite::Transaction` derefs to one). Record
//! access is generic: SQL is assembled from the static [`ModelSchema`]
//! descriptors, whose table and column names are compile-time constants.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::model::{
    registry, FieldKind, FieldSpec, LocalRecord, LocalValue, ModelSchema, RecordRef,
    RelationSpec, RelationTarget,
};
use crate::property::RelationLookup;

/// SQL schema for the local mirror.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    name TEXT
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    notion_id TEXT UNIQUE,
    title TEXT NOT NULL,
    published TEXT,
    slug TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    subtitle TEXT,
    author_id INTEGER REFERENCES users(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    notion_id TEXT UNIQUE,
    title TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    subtitle TEXT,
    main_menu INTEGER NOT NULL DEFAULT 0,
    ordering INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS subscribers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    notion_id TEXT UNIQUE,
    email TEXT NOT NULL UNIQUE,
    name TEXT,
    subscribed TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS post_tags (
    owner_id INTEGER NOT NULL REFERENCES posts(id),
    target_id INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (owner_id, target_id)
);

CREATE TABLE IF NOT EXISTS subscriber_excluded_tags (
    owner_id INTEGER NOT NULL REFERENCES subscribers(id),
    target_id INTEGER NOT NULL REFERENCES tags(id),
    PRIMARY KEY (owner_id, target_id)
);

CREATE TABLE IF NOT EXISTS subscriber_sent_posts (
    owner_id INTEGER NOT NULL REFERENCES subscribers(id),
    target_id INTEGER NOT NULL REFERENCES posts(id),
    PRIMARY KEY (owner_id, target_id)
);

-- Content blocks of any owning record, keyed by (owner_type, owner_id)
CREATE TABLE IF NOT EXISTS blocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_type TEXT NOT NULL,
    owner_id INTEGER NOT NULL,
    notion_id TEXT NOT NULL UNIQUE,
    ordering INTEGER NOT NULL DEFAULT 0,
    type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}'
);

-- Mirrored media, one row per (owner, base URL)
CREATE TABLE IF NOT EXISTS attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_type TEXT NOT NULL,
    owner_id INTEGER NOT NULL,
    notion_url TEXT NOT NULL,
    media TEXT NOT NULL,
    UNIQUE (owner_type, owner_id, notion_url)
);

CREATE INDEX IF NOT EXISTS idx_blocks_owner ON blocks(owner_type, owner_id, ordering);
CREATE INDEX IF NOT EXISTS idx_attachments_owner ON attachments(owner_type, owner_id);
CREATE INDEX IF NOT EXISTS idx_posts_published ON posts(published);
"#;

/// Run schema creation on a connection. Idempotent.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Generic owner reference for blocks and attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerRef {
    pub owner_type: &'static str,
    pub owner_id: i64,
}

impl OwnerRef {
    pub fn new(schema: &'static ModelSchema, owner_id: i64) -> Self {
        Self {
            owner_type: schema.name,
            owner_id,
        }
    }
}

/// A stored content block.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBlock {
    pub id: Option<i64>,
    pub owner_type: String,
    pub owner_id: i64,
    pub notion_id: Uuid,
    pub ordering: i64,
    pub block_type: String,
    pub properties: Value,
}

/// A mirrored media file.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: i64,
    pub owner_type: String,
    pub owner_id: i64,
    pub notion_url: String,
    pub media: String,
}

/// The local database.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction. The write lock is taken up-front, so a
    /// second sync process blocks here until this record is committed.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    pub fn create_user(&self, email: &str, name: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO users (email, name) VALUES (?1, ?2)",
            params![email, name],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<i64>> {
        find_user_by_email(&self.conn, email)
    }

    pub fn load_record(&self, schema: &ModelSchema, pk: i64) -> Result<LocalRecord> {
        load_record(&self.conn, schema, pk)
    }

    pub fn find_by_notion_id(
        &self,
        schema: &ModelSchema,
        notion_id: Uuid,
    ) -> Result<Option<LocalRecord>> {
        find_by_notion_id(&self.conn, schema, notion_id)
    }

    pub fn record_pks(&self, schema: &ModelSchema) -> Result<Vec<i64>> {
        record_pks(&self.conn, schema)
    }

    pub fn blocks_for(&self, owner: OwnerRef) -> Result<Vec<LocalBlock>> {
        blocks_for(&self.conn, owner)
    }

    pub fn attachments_for(&self, owner: OwnerRef) -> Result<Vec<Attachment>> {
        attachments_for(&self.conn, owner)
    }

    pub fn set_notion_id(&self, schema: &ModelSchema, pk: i64, notion_id: Uuid) -> Result<()> {
        set_notion_id(&self.conn, schema, pk, notion_id)
    }
}

fn corrupted(column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(SyncError::MalformedDocument(format!(
            "invalid value '{value}' in column '{column}'"
        ))),
    )
}

fn parse_uuid_opt(value: Option<String>, column: &str) -> rusqlite::Result<Option<Uuid>> {
    match value {
        None => Ok(None),
        Some(s) => Uuid::parse_str(&s).map(Some).map_err(|_| corrupted(column, &s)),
    }
}

fn parse_timestamp(value: &str, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupted(column, value))
}

/// `?, ?, ?` for `n` parameters.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn select_columns(schema: &ModelSchema) -> String {
    let mut columns = vec!["id".to_string(), "notion_id".to_string()];
    columns.extend(schema.column_fields().filter_map(FieldSpec::column));
    columns.join(", ")
}

fn read_record(schema: &ModelSchema, row: &Row<'_>) -> rusqlite::Result<LocalRecord> {
    let mut record = LocalRecord::new(parse_uuid_opt(row.get(1)?, "notion_id")?);
    record.pk = Some(row.get(0)?);
    for (i, field) in schema.column_fields().enumerate() {
        let idx = i + 2;
        let value = match field.kind {
            FieldKind::Text { .. } => row
                .get::<_, Option<String>>(idx)?
                .map_or(LocalValue::Null, LocalValue::Text),
            FieldKind::DateTime => match row.get::<_, Option<String>>(idx)? {
                Some(raw) => LocalValue::DateTime(parse_timestamp(&raw, field.name)?),
                None => LocalValue::Null,
            },
            FieldKind::Bool => row
                .get::<_, Option<i64>>(idx)?
                .map_or(LocalValue::Null, |v| LocalValue::Bool(v != 0)),
            FieldKind::Integer | FieldKind::User => row
                .get::<_, Option<i64>>(idx)?
                .map_or(LocalValue::Null, LocalValue::Integer),
            FieldKind::Relation(_) => continue,
        };
        record.values.insert(field.name.to_string(), value);
    }
    Ok(record)
}

fn to_sql(schema: &ModelSchema, field: &FieldSpec, value: &LocalValue) -> Result<SqlValue> {
    Ok(match (value, &field.kind) {
        (LocalValue::Null, FieldKind::Bool | FieldKind::Integer) => SqlValue::Integer(0),
        (LocalValue::Null, _) => SqlValue::Null,
        (LocalValue::Text(s), _) => SqlValue::Text(s.clone()),
        (LocalValue::Bool(b), _) => SqlValue::Integer(i64::from(*b)),
        (LocalValue::Integer(i), _) => SqlValue::Integer(*i),
        (LocalValue::DateTime(dt), _) => SqlValue::Text(dt.to_rfc3339()),
        (other, _) => {
            return Err(SyncError::Validation {
                model: schema.name.to_string(),
                field: field.name.to_string(),
                message: format!("cannot store a {} value in a column", other.kind_name()),
            })
        }
    })
}

pub fn find_by_notion_id(
    conn: &Connection,
    schema: &ModelSchema,
    notion_id: Uuid,
) -> Result<Option<LocalRecord>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE notion_id = ?1",
        select_columns(schema),
        schema.table
    );
    Ok(conn
        .query_row(&sql, params![notion_id.to_string()], |row| {
            read_record(schema, row)
        })
        .optional()?)
}

/// Load a record by primary key, with relation fields materialized.
pub fn load_record(conn: &Connection, schema: &ModelSchema, pk: i64) -> Result<LocalRecord> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        select_columns(schema),
        schema.table
    );
    let mut record = conn
        .query_row(&sql, params![pk], |row| read_record(schema, row))
        .optional()?
        .ok_or_else(|| SyncError::RecordNotFound {
            model: schema.name.to_string(),
            pk,
        })?;
    for field in schema.relation_fields() {
        if let FieldKind::Relation(spec) = &field.kind {
            record.set(field.name, relation_links(conn, spec, pk)?);
        }
    }
    Ok(record)
}

pub fn record_pks(conn: &Connection, schema: &ModelSchema) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {} ORDER BY id", schema.table))?;
    let pks = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(pks)
}

/// Reject values that would collide with another row on a unique field.
pub fn validate_unique(conn: &Connection, schema: &ModelSchema, record: &LocalRecord) -> Result<()> {
    for field in schema.column_fields().filter(|f| f.unique) {
        let value = record.get(field.name);
        if value.is_null() {
            continue;
        }
        let Some(column) = field.column() else {
            continue;
        };
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {column} = ?1 AND id IS NOT ?2",
            schema.table
        );
        let clashes: i64 = conn.query_row(
            &sql,
            params![to_sql(schema, field, value)?, record.pk],
            |row| row.get(0),
        )?;
        if clashes > 0 {
            return Err(SyncError::Validation {
                model: schema.name.to_string(),
                field: field.name.to_string(),
                message: format!("a record with this {} already exists ({value})", field.name),
            });
        }
    }
    Ok(())
}

/// Full model validation: field rules plus uniqueness.
pub fn full_clean(conn: &Connection, schema: &ModelSchema, record: &LocalRecord) -> Result<()> {
    crate::model::validate(schema, record)?;
    validate_unique(conn, schema, record)
}

/// Insert or update the record's columns, assigning `record.pk` on insert.
pub fn save_record(conn: &Connection, schema: &ModelSchema, record: &mut LocalRecord) -> Result<i64> {
    let fields: Vec<&FieldSpec> = schema.column_fields().collect();
    let mut values = vec![SqlValue::from(record.notion_id.map(|id| id.to_string()))];
    let mut columns = vec!["notion_id".to_string()];
    for field in &fields {
        values.push(to_sql(schema, field, record.get(field.name))?);
        columns.extend(field.column());
    }

    match record.pk {
        Some(pk) => {
            let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
            values.push(SqlValue::Integer(pk));
            conn.execute(
                &format!(
                    "UPDATE {} SET {} WHERE id = ?",
                    schema.table,
                    assignments.join(", ")
                ),
                params_from_iter(values),
            )?;
            Ok(pk)
        }
        None => {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    schema.table,
                    columns.join(", "),
                    placeholders(columns.len())
                ),
                params_from_iter(values),
            )?;
            let pk = conn.last_insert_rowid();
            record.pk = Some(pk);
            Ok(pk)
        }
    }
}

pub fn set_notion_id(conn: &Connection, schema: &ModelSchema, pk: i64, notion_id: Uuid) -> Result<()> {
    conn.execute(
        &format!("UPDATE {} SET notion_id = ?1 WHERE id = ?2", schema.table),
        params![notion_id.to_string(), pk],
    )?;
    Ok(())
}

/// Current links of a relation: tag names (sorted) or records.
pub fn relation_links(conn: &Connection, spec: &RelationSpec, owner_pk: i64) -> Result<LocalValue> {
    match spec.target {
        RelationTarget::Tags => {
            let mut stmt = conn.prepare(&format!(
                "SELECT t.name FROM {} l JOIN tags t ON t.id = l.target_id \
                 WHERE l.owner_id = ?1 ORDER BY t.name",
                spec.link_table
            ))?;
            let names = stmt
                .query_map(params![owner_pk], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(LocalValue::Names(names))
        }
        RelationTarget::Model(target) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT r.id, r.notion_id FROM {} l JOIN {} r ON r.id = l.target_id \
                 WHERE l.owner_id = ?1",
                spec.link_table, target.table
            ))?;
            let records = stmt
                .query_map(params![owner_pk], |row| {
                    Ok(RecordRef {
                        model: target.name,
                        pk: row.get(0)?,
                        notion_id: parse_uuid_opt(row.get(1)?, "notion_id")?,
                    })
                })?
                .collect::<rusqlite::Result<BTreeSet<RecordRef>>>()?;
            Ok(LocalValue::Records(records))
        }
    }
}

pub fn get_or_create_tag(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![name])?;
    Ok(conn.query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| {
        row.get(0)
    })?)
}

/// Replace the links of a relation with exactly the rows `value` resolves to.
///
/// Names are get-or-created as tags; records must belong to the relation's
/// target collection. Rows linked before but not resolved now are unlinked.
pub fn set_relation(
    conn: &Connection,
    field: &FieldSpec,
    owner_pk: i64,
    value: &LocalValue,
) -> Result<()> {
    let FieldKind::Relation(spec) = &field.kind else {
        return Ok(());
    };
    let unrecognized = |value: String| SyncError::UnrecognizedRelationValue {
        field: field.name.to_string(),
        value,
    };

    let mut targets: Vec<i64> = Vec::new();
    match (&spec.target, value) {
        (_, LocalValue::Null) => {}
        (RelationTarget::Tags, LocalValue::Names(names)) => {
            for name in names {
                targets.push(get_or_create_tag(conn, name)?);
            }
        }
        (RelationTarget::Tags, LocalValue::Text(name)) => {
            targets.push(get_or_create_tag(conn, name)?);
        }
        (RelationTarget::Model(target), LocalValue::Records(records)) => {
            for record in records {
                if record.model != target.name {
                    return Err(unrecognized(format!("{} record {}", record.model, record.pk)));
                }
                targets.push(record.pk);
            }
        }
        (_, other) => return Err(unrecognized(format!("{} value '{other}'", other.kind_name()))),
    }
    targets.sort_unstable();
    targets.dedup();

    for target in &targets {
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (owner_id, target_id) VALUES (?1, ?2)",
                spec.link_table
            ),
            params![owner_pk, target],
        )?;
    }

    let mut values = vec![SqlValue::Integer(owner_pk)];
    values.extend(targets.iter().map(|t| SqlValue::Integer(*t)));
    let removed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE owner_id = ? AND target_id NOT IN ({})",
            spec.link_table,
            placeholders(targets.len())
        ),
        params_from_iter(values),
    )?;
    debug!(
        field = field.name,
        owner_pk,
        linked = targets.len(),
        removed,
        "Reconciled relation"
    );
    Ok(())
}

/// Resolves remote ids against every schema in `schemas`.
pub struct CollectionLookup<'c> {
    conn: &'c Connection,
    schemas: Vec<&'static ModelSchema>,
}

impl<'c> CollectionLookup<'c> {
    pub fn new(conn: &'c Connection, schemas: Vec<&'static ModelSchema>) -> Self {
        Self { conn, schemas }
    }

    /// Lookup over the schemas of the given configured collections.
    pub fn for_collections<'a>(
        conn: &'c Connection,
        collections: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let names: Vec<&str> = collections.into_iter().collect();
        let schemas = registry()
            .into_iter()
            .filter(|s| names.contains(&s.name))
            .collect();
        Self::new(conn, schemas)
    }
}

impl RelationLookup for CollectionLookup<'_> {
    fn resolve(&self, notion_ids: &[Uuid]) -> Result<BTreeSet<RecordRef>> {
        let mut found = BTreeSet::new();
        if notion_ids.is_empty() {
            return Ok(found);
        }
        let ids: Vec<String> = notion_ids.iter().map(Uuid::to_string).collect();
        for schema in &self.schemas {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT id, notion_id FROM {} WHERE notion_id IN ({})",
                schema.table,
                placeholders(ids.len())
            ))?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                Ok(RecordRef {
                    model: schema.name,
                    pk: row.get(0)?,
                    notion_id: parse_uuid_opt(row.get(1)?, "notion_id")?,
                })
            })?;
            for row in rows {
                found.insert(row?);
            }
        }
        Ok(found)
    }
}

fn read_block(row: &Row<'_>) -> rusqlite::Result<LocalBlock> {
    let notion_id: String = row.get(3)?;
    let properties: String = row.get(6)?;
    Ok(LocalBlock {
        id: Some(row.get(0)?),
        owner_type: row.get(1)?,
        owner_id: row.get(2)?,
        notion_id: Uuid::parse_str(&notion_id).map_err(|_| corrupted("notion_id", &notion_id))?,
        ordering: row.get(4)?,
        block_type: row.get(5)?,
        properties: serde_json::from_str(&properties)
            .map_err(|_| corrupted("properties", &properties))?,
    })
}

const BLOCK_COLUMNS: &str = "id, owner_type, owner_id, notion_id, ordering, type, properties";

pub fn find_block(conn: &Connection, notion_id: Uuid) -> Result<Option<LocalBlock>> {
    Ok(conn
        .query_row(
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE notion_id = ?1"),
            params![notion_id.to_string()],
            read_block,
        )
        .optional()?)
}

pub fn save_block(conn: &Connection, block: &mut LocalBlock) -> Result<i64> {
    if block.block_type.is_empty() || block.block_type.len() > 300 {
        return Err(SyncError::Validation {
            model: "Block".to_string(),
            field: "type".to_string(),
            message: format!("invalid block type '{}'", block.block_type),
        });
    }
    let properties = serde_json::to_string(&block.properties)?;
    match block.id {
        Some(id) => {
            conn.execute(
                "UPDATE blocks SET owner_type = ?1, owner_id = ?2, ordering = ?3, type = ?4, \
                 properties = ?5 WHERE id = ?6",
                params![
                    block.owner_type,
                    block.owner_id,
                    block.ordering,
                    block.block_type,
                    properties,
                    id
                ],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO blocks (owner_type, owner_id, notion_id, ordering, type, properties) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    block.owner_type,
                    block.owner_id,
                    block.notion_id.to_string(),
                    block.ordering,
                    block.block_type,
                    properties
                ],
            )?;
            let id = conn.last_insert_rowid();
            block.id = Some(id);
            Ok(id)
        }
    }
}

/// Blocks of an owner in display order.
pub fn blocks_for(conn: &Connection, owner: OwnerRef) -> Result<Vec<LocalBlock>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks WHERE owner_type = ?1 AND owner_id = ?2 \
         ORDER BY ordering, id"
    ))?;
    let blocks = stmt
        .query_map(params![owner.owner_type, owner.owner_id], read_block)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

/// Delete the owner's blocks whose ids are not in `keep`.
pub fn prune_blocks(conn: &Connection, owner: OwnerRef, keep: &[i64]) -> Result<usize> {
    let mut values = vec![
        SqlValue::Text(owner.owner_type.to_string()),
        SqlValue::Integer(owner.owner_id),
    ];
    values.extend(keep.iter().map(|id| SqlValue::Integer(*id)));
    Ok(conn.execute(
        &format!(
            "DELETE FROM blocks WHERE owner_type = ? AND owner_id = ? AND id NOT IN ({})",
            placeholders(keep.len())
        ),
        params_from_iter(values),
    )?)
}

fn read_attachment(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        owner_type: row.get(1)?,
        owner_id: row.get(2)?,
        notion_url: row.get(3)?,
        media: row.get(4)?,
    })
}

pub fn attachments_for(conn: &Connection, owner: OwnerRef) -> Result<Vec<Attachment>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_type, owner_id, notion_url, media FROM attachments \
         WHERE owner_type = ?1 AND owner_id = ?2 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![owner.owner_type, owner.owner_id], read_attachment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn find_attachment(conn: &Connection, owner: OwnerRef, base_url: &str) -> Result<Option<Attachment>> {
    Ok(conn
        .query_row(
            "SELECT id, owner_type, owner_id, notion_url, media FROM attachments \
             WHERE owner_type = ?1 AND owner_id = ?2 AND notion_url = ?3",
            params![owner.owner_type, owner.owner_id, base_url],
            read_attachment,
        )
        .optional()?)
}

pub fn create_attachment(conn: &Connection, owner: OwnerRef, base_url: &str, media: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO attachments (owner_type, owner_id, notion_url, media) VALUES (?1, ?2, ?3, ?4)",
        params![owner.owner_type, owner.owner_id, base_url, media],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Whether any attachment row already claims the stored file `media`.
pub fn media_in_use(conn: &Connection, media: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM attachments WHERE media = ?1 LIMIT 1",
            params![media],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn delete_attachment(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM attachments WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1 COLLATE NOCASE",
            params![email],
            |row| row.get(0),
        )
        .optional()?)
}

/// Delete every record of `schema` whose pk is not in `keep`, together with
/// its blocks, attachments and link rows (on both sides of relations).
pub fn prune_records(conn: &Connection, schema: &'static ModelSchema, keep: &[i64]) -> Result<usize> {
    let stale: Vec<i64> = record_pks(conn, schema)?
        .into_iter()
        .filter(|pk| !keep.contains(pk))
        .collect();

    for pk in &stale {
        let owner = OwnerRef::new(schema, *pk);
        prune_blocks(conn, owner, &[])?;
        conn.execute(
            "DELETE FROM attachments WHERE owner_type = ?1 AND owner_id = ?2",
            params![owner.owner_type, owner.owner_id],
        )?;
        for field in schema.relation_fields() {
            if let FieldKind::Relation(spec) = &field.kind {
                conn.execute(
                    &format!("DELETE FROM {} WHERE owner_id = ?1", spec.link_table),
                    params![pk],
                )?;
            }
        }
        for other in registry() {
            for field in other.relation_fields() {
                if let FieldKind::Relation(RelationSpec {
                    link_table,
                    target: RelationTarget::Model(target),
                }) = &field.kind
                {
                    if target.name == schema.name {
                        conn.execute(
                            &format!("DELETE FROM {link_table} WHERE target_id = ?1"),
                            params![pk],
                        )?;
                    }
                }
            }
        }
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", schema.table),
            params![pk],
        )?;
    }
    Ok(stale.len())
}
