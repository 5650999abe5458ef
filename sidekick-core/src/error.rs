//! Error taxonomy for the sync engine and the block renderer.
//!
//! Configuration errors (unsupported property/block types, unhandled icon
//! documents, relation values of an unknown kind) signal a mismatch between
//! the remote workspace and the local schema; they are never retried.
//! Validation and lookup errors are fatal for the record being synced.
//! Transport and storage errors propagate unchanged and abort the current
//! unit of work.

use thiserror::Error;

/// All errors raised by sidekick-core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unsupported property type '{kind}' on property '{name}'")]
    UnsupportedPropertyType { name: String, kind: String },

    #[error("unsupported block type '{0}'")]
    UnsupportedBlockType(String),

    #[error("unhandled callout icon: {0}")]
    UnhandledIcon(serde_json::Value),

    #[error("unrecognized relation value for field '{field}': {value}")]
    UnrecognizedRelationValue { field: String, value: String },

    #[error("type mismatch on '{name}': expected {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        got: String,
    },

    #[error("no Notion database configured for collection '{0}'")]
    CollectionNotConfigured(String),

    #[error("media handler not configured, cannot mirror {0}")]
    MediaHandlerMissing(String),

    #[error("invalid {model}.{field}: {message}")]
    Validation {
        model: String,
        field: String,
        message: String,
    },

    #[error("no local user with email '{email}' (Notion user {notion_id})")]
    UserNotFound { notion_id: String, email: String },

    #[error("{model} record {pk} not found")]
    RecordNotFound { model: String, pk: i64 },

    #[error("malformed remote document: {0}")]
    MalformedDocument(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("Notion API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
