//! Local schema descriptors and the generic in-memory record.
//!
//! Each synced collection is described by a static [`ModelSchema`]: its
//! table, its fields and whether it owns content blocks. The sync engine is
//! driven entirely by these descriptors, so adding a collection means adding
//! a schema (plus its table in [`crate::store::SCHEMA`]), not new sync code.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::{Result, SyncError};

/// A record in another (or the same) collection, as returned by relation
/// lookups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordRef {
    pub model: &'static str,
    pub pk: i64,
    pub notion_id: Option<Uuid>,
}

/// A plain local value, as produced by the property converter and stored
/// in a [`LocalRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum LocalValue {
    Null,
    Text(String),
    Bool(bool),
    Integer(i64),
    DateTime(DateTime<Utc>),
    /// Plain names (multi-select options, tag names).
    Names(Vec<String>),
    /// Linked local records.
    Records(BTreeSet<RecordRef>),
}

impl LocalValue {
    pub fn is_null(&self) -> bool {
        matches!(self, LocalValue::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            LocalValue::Null => "null",
            LocalValue::Text(_) => "text",
            LocalValue::Bool(_) => "bool",
            LocalValue::Integer(_) => "integer",
            LocalValue::DateTime(_) => "datetime",
            LocalValue::Names(_) => "names",
            LocalValue::Records(_) => "records",
        }
    }
}

impl fmt::Display for LocalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalValue::Null => f.write_str("None"),
            LocalValue::Text(s) => f.write_str(s),
            LocalValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            LocalValue::Integer(i) => write!(f, "{i}"),
            LocalValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            LocalValue::Names(names) => write!(f, "{}", names.join(", ")),
            LocalValue::Records(records) => {
                let pks: Vec<String> = records.iter().map(|r| r.pk.to_string()).collect();
                write!(f, "{}", pks.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Slug,
    Email,
}

#[derive(Debug)]
pub enum RelationTarget {
    /// Free-form tags, get-or-created by name.
    Tags,
    /// Records of another collection.
    Model(&'static ModelSchema),
}

/// A many-to-many link stored in `link_table (owner_id, target_id)`.
#[derive(Debug)]
pub struct RelationSpec {
    pub link_table: &'static str,
    pub target: RelationTarget,
}

#[derive(Debug)]
pub enum FieldKind {
    Text {
        max_len: Option<usize>,
        format: TextFormat,
    },
    DateTime,
    Bool,
    Integer,
    /// Foreign key to a local user, stored in `{name}_id`.
    User,
    Relation(RelationSpec),
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
}

impl FieldSpec {
    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation(_))
    }

    /// Column backing this field; `None` for relations.
    pub fn column(&self) -> Option<String> {
        match self.kind {
            FieldKind::Relation(_) => None,
            FieldKind::User => Some(format!("{}_id", self.name)),
            _ => Some(self.name.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct ModelSchema {
    /// Collection identifier used in configuration, e.g. `newsletter.Post`.
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
    /// Whether records own content blocks.
    pub has_blocks: bool,
}

impl PartialEq for ModelSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl ModelSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// The field a remote property maps onto by naming convention.
    pub fn field_for_property(&self, property_name: &str) -> Option<&'static FieldSpec> {
        self.field(&field_name(property_name))
    }

    pub fn column_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().filter(|f| !f.is_relation())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields.iter().filter(|f| f.is_relation())
    }
}

const fn text(name: &'static str, max_len: usize, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text {
            max_len: Some(max_len),
            format: TextFormat::Plain,
        },
        required,
        unique: false,
    }
}

pub static POST: ModelSchema = ModelSchema {
    name: "newsletter.Post",
    table: "posts",
    has_blocks: true,
    fields: &[
        text("title", 100, true),
        FieldSpec {
            name: "published",
            kind: FieldKind::DateTime,
            required: false,
            unique: false,
        },
        FieldSpec {
            name: "slug",
            kind: FieldKind::Text {
                max_len: Some(100),
                format: TextFormat::Slug,
            },
            required: true,
            unique: true,
        },
        text("status", 30, true),
        FieldSpec {
            name: "subtitle",
            kind: FieldKind::Text {
                max_len: None,
                format: TextFormat::Plain,
            },
            required: false,
            unique: false,
        },
        FieldSpec {
            name: "author",
            kind: FieldKind::User,
            required: false,
            unique: false,
        },
        FieldSpec {
            name: "tags",
            kind: FieldKind::Relation(RelationSpec {
                link_table: "post_tags",
                target: RelationTarget::Tags,
            }),
            required: false,
            unique: false,
        },
    ],
};

pub static PAGE: ModelSchema = ModelSchema {
    name: "front.Page",
    table: "pages",
    has_blocks: true,
    fields: &[
        text("title", 100, true),
        FieldSpec {
            name: "slug",
            kind: FieldKind::Text {
                max_len: Some(100),
                format: TextFormat::Slug,
            },
            required: true,
            unique: true,
        },
        text("status", 30, true),
        FieldSpec {
            name: "subtitle",
            kind: FieldKind::Text {
                max_len: None,
                format: TextFormat::Plain,
            },
            required: false,
            unique: false,
        },
        FieldSpec {
            name: "main_menu",
            kind: FieldKind::Bool,
            required: false,
            unique: false,
        },
        FieldSpec {
            name: "ordering",
            kind: FieldKind::Integer,
            required: false,
            unique: false,
        },
    ],
};

pub static SUBSCRIBER: ModelSchema = ModelSchema {
    name: "newsletter.Subscriber",
    table: "subscribers",
    has_blocks: false,
    fields: &[
        FieldSpec {
            name: "email",
            kind: FieldKind::Text {
                max_len: Some(255),
                format: TextFormat::Email,
            },
            required: true,
            unique: true,
        },
        text("name", 100, false),
        FieldSpec {
            name: "subscribed",
            kind: FieldKind::DateTime,
            required: true,
            unique: false,
        },
        FieldSpec {
            name: "excluded_tags",
            kind: FieldKind::Relation(RelationSpec {
                link_table: "subscriber_excluded_tags",
                target: RelationTarget::Tags,
            }),
            required: false,
            unique: false,
        },
        FieldSpec {
            name: "sent_posts",
            kind: FieldKind::Relation(RelationSpec {
                link_table: "subscriber_sent_posts",
                target: RelationTarget::Model(&POST),
            }),
            required: false,
            unique: false,
        },
    ],
};

/// Every schema known to this build.
pub fn registry() -> [&'static ModelSchema; 3] {
    [&POST, &SUBSCRIBER, &PAGE]
}

pub fn schema_for(collection: &str) -> Option<&'static ModelSchema> {
    registry().into_iter().find(|s| s.name == collection)
}

/// Field name for a remote property: lowercased, spaces become underscores.
pub fn field_name(property_name: &str) -> String {
    property_name.replace(' ', "_").to_lowercase()
}

/// In-memory form of a row of any [`ModelSchema`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalRecord {
    pub pk: Option<i64>,
    pub notion_id: Option<Uuid>,
    pub values: BTreeMap<String, LocalValue>,
}

impl LocalRecord {
    pub fn new(notion_id: Option<Uuid>) -> Self {
        Self {
            pk: None,
            notion_id,
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> &LocalValue {
        static NULL: LocalValue = LocalValue::Null;
        self.values.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: &str, value: LocalValue) {
        self.values.insert(field.to_string(), value);
    }

    /// Text value of `field`, treating empty strings as absent.
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.get(field) {
            LocalValue::Text(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn datetime(&self, field: &str) -> Option<DateTime<Utc>> {
        match self.get(field) {
            LocalValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    fn is_blank(&self, field: &str) -> bool {
        match self.get(field) {
            LocalValue::Null => true,
            LocalValue::Text(s) => s.is_empty(),
            LocalValue::Names(n) => n.is_empty(),
            LocalValue::Records(r) => r.is_empty(),
            _ => false,
        }
    }
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("slug pattern"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"))
}

fn invalid(schema: &ModelSchema, field: &FieldSpec, message: impl Into<String>) -> SyncError {
    SyncError::Validation {
        model: schema.name.to_string(),
        field: field.name.to_string(),
        message: message.into(),
    }
}

/// Field-level validation: required values, value kinds, lengths and
/// formats. Uniqueness needs the database and is checked by
/// [`crate::store::validate_unique`].
pub fn validate(schema: &ModelSchema, record: &LocalRecord) -> Result<()> {
    for field in schema.column_fields() {
        let value = record.get(field.name);
        if field.required && record.is_blank(field.name) {
            return Err(invalid(schema, field, "this field cannot be blank"));
        }
        match (&field.kind, value) {
            (_, LocalValue::Null) => {}
            (FieldKind::Text { max_len, format }, LocalValue::Text(s)) => {
                if let Some(max) = max_len {
                    let len = s.chars().count();
                    if len > *max {
                        return Err(invalid(
                            schema,
                            field,
                            format!("ensure this value has at most {max} characters (it has {len})"),
                        ));
                    }
                }
                let bad_format = match format {
                    TextFormat::Plain => false,
                    TextFormat::Slug => !s.is_empty() && !slug_re().is_match(s),
                    TextFormat::Email => !s.is_empty() && !email_re().is_match(s),
                };
                if bad_format {
                    return Err(invalid(schema, field, format!("'{s}' is not a valid {format:?}")));
                }
            }
            (FieldKind::DateTime, LocalValue::DateTime(_))
            | (FieldKind::Bool, LocalValue::Bool(_))
            | (FieldKind::Integer, LocalValue::Integer(_))
            | (FieldKind::User, LocalValue::Integer(_)) => {}
            (kind, other) => {
                return Err(invalid(
                    schema,
                    field,
                    format!("{} value does not fit a {kind:?} field", other.kind_name()),
                ));
            }
        }
    }
    Ok(())
}

/// URL slug: ASCII only, lowercased, punctuation dropped, whitespace and
/// dash runs collapsed to a single dash.
pub fn slugify(value: &str) -> String {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    static DASH: OnceLock<Regex> = OnceLock::new();
    let strip = STRIP.get_or_init(|| Regex::new(r"[^\w\s-]").expect("strip pattern"));
    let dash = DASH.get_or_init(|| Regex::new(r"[-\s]+").expect("dash pattern"));

    let ascii: String = value.chars().filter(char::is_ascii).collect();
    let lowered = ascii.to_lowercase();
    let stripped = strip.replace_all(&lowered, "");
    dash.replace_all(&stripped, "-")
        .trim_matches(|c| c == '-' || c == '_')
        .to_string()
}
