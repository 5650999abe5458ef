//! Property converter: remote typed property documents ⇄ [`LocalValue`].
//!
//! Dispatch is on a closed [`PropertyKind`]; unknown type tags become
//! [`PropertyKind::Unsupported`] and fail on use with
//! [`SyncError::UnsupportedPropertyType`].

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::model::{LocalValue, RecordRef};
use crate::remote::{parse_notion_id, RemoteProperty};

/// Resolves remote record ids to local records across every configured
/// collection.
pub trait RelationLookup {
    fn resolve(&self, notion_ids: &[Uuid]) -> Result<BTreeSet<RecordRef>>;
}

/// Lookup for contexts where no relation can resolve (no collections).
pub struct NoRelations;

impl RelationLookup for NoRelations {
    fn resolve(&self, _notion_ids: &[Uuid]) -> Result<BTreeSet<RecordRef>> {
        Ok(BTreeSet::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Date,
    Url,
    Email,
    Checkbox,
    Select,
    Status,
    MultiSelect,
    Title,
    RichText,
    Text,
    Relation,
    Unsupported(String),
}

impl PropertyKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "date" => PropertyKind::Date,
            "url" => PropertyKind::Url,
            "email" => PropertyKind::Email,
            "checkbox" => PropertyKind::Checkbox,
            "select" => PropertyKind::Select,
            "status" => PropertyKind::Status,
            "multi_select" => PropertyKind::MultiSelect,
            "title" => PropertyKind::Title,
            "rich_text" => PropertyKind::RichText,
            "text" => PropertyKind::Text,
            "relation" => PropertyKind::Relation,
            other => PropertyKind::Unsupported(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            PropertyKind::Date => "date",
            PropertyKind::Url => "url",
            PropertyKind::Email => "email",
            PropertyKind::Checkbox => "checkbox",
            PropertyKind::Select => "select",
            PropertyKind::Status => "status",
            PropertyKind::MultiSelect => "multi_select",
            PropertyKind::Title => "title",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Text => "text",
            PropertyKind::Relation => "relation",
            PropertyKind::Unsupported(tag) => tag,
        }
    }
}

/// A named, typed property value.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub id: Option<String>,
    pub kind: PropertyKind,
    pub value: Value,
}

impl Property {
    pub fn parse(name: &str, document: &RemoteProperty) -> Self {
        Self {
            name: name.to_string(),
            id: document.id.clone(),
            kind: PropertyKind::from_tag(&document.kind),
            value: document.payload().clone(),
        }
    }

    /// Fail unless the type tag is one we can convert.
    pub fn ensure_supported(&self) -> Result<()> {
        match &self.kind {
            PropertyKind::Unsupported(_) => Err(self.unsupported()),
            _ => Ok(()),
        }
    }

    fn unsupported(&self) -> SyncError {
        SyncError::UnsupportedPropertyType {
            name: self.name.clone(),
            kind: self.kind.tag().to_string(),
        }
    }

    fn mismatch(&self, expected: &'static str, got: &impl ToString) -> SyncError {
        SyncError::TypeMismatch {
            name: self.name.clone(),
            expected,
            got: got.to_string(),
        }
    }

    /// Convert the remote payload to a plain local value.
    pub fn to_local(&self, lookup: &dyn RelationLookup) -> Result<LocalValue> {
        let value = &self.value;
        match &self.kind {
            PropertyKind::Date => match value {
                Value::Null => Ok(LocalValue::Null),
                Value::Object(range) => match range.get("start") {
                    Some(Value::String(start)) => parse_date(start)
                        .map(LocalValue::DateTime)
                        .ok_or_else(|| self.mismatch("ISO 8601 date", start)),
                    None | Some(Value::Null) => Ok(LocalValue::Null),
                    Some(other) => Err(self.mismatch("ISO 8601 date", other)),
                },
                other => Err(self.mismatch("date range object", other)),
            },
            PropertyKind::Url | PropertyKind::Email => match value {
                Value::Null => Ok(LocalValue::Null),
                Value::String(s) => Ok(LocalValue::Text(s.clone())),
                other => Err(self.mismatch("string", other)),
            },
            PropertyKind::Checkbox => match value {
                Value::Null => Ok(LocalValue::Null),
                Value::Bool(b) => Ok(LocalValue::Bool(*b)),
                other => Err(self.mismatch("boolean", other)),
            },
            PropertyKind::Select | PropertyKind::Status => match value {
                Value::Null => Ok(LocalValue::Null),
                Value::Object(option) => match option.get("name") {
                    Some(Value::String(name)) => Ok(LocalValue::Text(name.clone())),
                    _ => Err(self.mismatch("option with a name", value)),
                },
                other => Err(self.mismatch("option object", other)),
            },
            PropertyKind::MultiSelect => {
                let mut names = option_names(value).ok_or_else(|| self.mismatch("option list", value))?;
                names.sort();
                Ok(LocalValue::Names(names))
            }
            PropertyKind::Title | PropertyKind::RichText | PropertyKind::Text => {
                plain_text(value)
                    .map(LocalValue::Text)
                    .ok_or_else(|| self.mismatch("rich text run list", value))
            }
            PropertyKind::Relation => {
                let ids = relation_ids(value).ok_or_else(|| self.mismatch("relation list", value))??;
                Ok(LocalValue::Records(lookup.resolve(&ids)?))
            }
            PropertyKind::Unsupported(_) => Err(self.unsupported()),
        }
    }

    /// Build the remote payload `{tag: …}` for a local value.
    pub fn from_local(&self, value: &LocalValue) -> Result<Value> {
        let tag = self.kind.tag();
        let payload = match &self.kind {
            PropertyKind::Date => match value {
                LocalValue::Null => Value::Null,
                LocalValue::DateTime(dt) => json!({ "start": dt.to_rfc3339() }),
                LocalValue::Text(s) => json!({ "start": s }),
                other => return Err(self.mismatch("datetime", &other.kind_name())),
            },
            PropertyKind::Url | PropertyKind::Email => match value {
                LocalValue::Null => Value::Null,
                LocalValue::Text(s) => Value::String(s.clone()),
                other => return Err(self.mismatch("text", &other.kind_name())),
            },
            PropertyKind::Checkbox => match value {
                LocalValue::Bool(b) => Value::Bool(*b),
                other => return Err(self.mismatch("bool", &other.kind_name())),
            },
            PropertyKind::Select | PropertyKind::Status => match value {
                LocalValue::Null => Value::Null,
                LocalValue::Names(_) | LocalValue::Records(_) => {
                    return Err(self.mismatch("single value", &value.kind_name()))
                }
                other => json!({ "name": other.to_string() }),
            },
            PropertyKind::MultiSelect => match value {
                LocalValue::Names(names) => {
                    Value::Array(names.iter().map(|n| json!({ "name": n })).collect())
                }
                LocalValue::Text(s) => json!([{ "name": s }]),
                other => return Err(self.mismatch("names", &other.kind_name())),
            },
            PropertyKind::Title | PropertyKind::RichText | PropertyKind::Text => match value {
                LocalValue::Names(_) | LocalValue::Records(_) => {
                    return Err(self.mismatch("text", &value.kind_name()))
                }
                other => json!([{ "type": "text", "text": { "content": other.to_string() } }]),
            },
            PropertyKind::Relation => match value {
                // Records without a remote id cannot be referenced remotely.
                LocalValue::Records(records) => Value::Array(
                    records
                        .iter()
                        .filter_map(|r| r.notion_id)
                        .map(|id| json!({ "id": id.to_string() }))
                        .collect(),
                ),
                LocalValue::Names(names) => {
                    Value::Array(names.iter().map(|n| json!({ "name": n })).collect())
                }
                other => return Err(self.mismatch("records or names", &other.kind_name())),
            },
            PropertyKind::Unsupported(_) => return Err(self.unsupported()),
        };
        Ok(json!({ tag: payload }))
    }
}

/// Parse the `start` of a date range: RFC 3339, or a bare date at midnight UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Concatenated `plain_text` of a rich text run list. Runs built for writes
/// carry only `text.content`, which is used in its place.
pub fn plain_text(runs: &Value) -> Option<String> {
    let runs = match runs {
        Value::Null => return Some(String::new()),
        Value::Array(runs) => runs,
        _ => return None,
    };
    Some(
        runs.iter()
            .filter_map(|run| {
                run.get("plain_text")
                    .or_else(|| run.pointer("/text/content"))
                    .and_then(Value::as_str)
            })
            .collect(),
    )
}

fn option_names(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Array(options) => options
            .iter()
            .map(|o| o.get("name").and_then(Value::as_str).map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn relation_ids(value: &Value) -> Option<Result<Vec<Uuid>>> {
    match value {
        Value::Null => Some(Ok(Vec::new())),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item.get("id").and_then(Value::as_str) {
                    Some(id) => parse_notion_id(id),
                    None => Err(SyncError::MalformedDocument(format!(
                        "relation item without id: {item}"
                    ))),
                })
                .collect(),
        ),
        _ => None,
    }
}
