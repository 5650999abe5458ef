//! Remote document shapes returned by the Notion API, and the cursor
//! paginator used for every list endpoint.
//!
//! Only the fields the sync engine reads are modelled; everything
//! type-specific stays as raw JSON under [`RemoteProperty::data`] and
//! [`RemoteBlock::data`] and is interpreted by the property and block
//! converters.

use std::collections::BTreeMap;
use std::future::Future;

use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SyncError};

static NULL: Value = Value::Null;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl<T> Paginated<T> {
    /// A final page holding all `results`.
    pub fn last(results: Vec<T>) -> Self {
        Self {
            results,
            has_more: false,
            next_cursor: None,
        }
    }
}

/// Reference to a workspace user, as embedded in `created_by`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
}

/// A typed property value (on a page) or property definition (on a database).
///
/// The payload lives under a key equal to the type tag, e.g.
/// `{"id": "abc", "type": "select", "select": {"name": "Draft"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteProperty {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl RemoteProperty {
    pub fn payload(&self) -> &Value {
        self.data.get(&self.kind).unwrap_or(&NULL)
    }
}

/// A database row ("page") with its typed properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub created_by: Option<UserRef>,
    #[serde(default)]
    pub properties: BTreeMap<String, RemoteProperty>,
}

impl RemoteRecord {
    pub fn notion_id(&self) -> Result<Uuid> {
        parse_notion_id(&self.id)
    }
}

/// A content block. Children are not embedded; they are listed on demand
/// when `has_children` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl RemoteBlock {
    pub fn payload(&self) -> &Value {
        self.data.get(&self.kind).unwrap_or(&NULL)
    }

    pub fn notion_id(&self) -> Result<Uuid> {
        parse_notion_id(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub person: Option<Person>,
}

/// A database with its property schema (name → definition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDatabase {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, RemoteProperty>,
}

pub fn parse_notion_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| SyncError::MalformedDocument(format!("bad id '{raw}': {e}")))
}

/// Turn a cursor-paginated endpoint into a lazy stream of its items.
///
/// `fetch` is called with `None` for the first page and with the previous
/// page's `next_cursor` afterwards. No request is made until the stream is
/// polled, and the stream ends once a page reports `has_more == false` (or
/// omits its cursor).
pub fn paginate<'a, T, F, Fut>(fetch: F) -> impl Stream<Item = Result<T>> + 'a
where
    T: 'a,
    F: FnMut(Option<String>) -> Fut + 'a,
    Fut: Future<Output = Result<Paginated<T>>> + 'a,
{
    stream::try_unfold((fetch, Some(None)), |(mut fetch, cursor)| async move {
        let Some(cursor) = cursor else {
            return Ok::<_, SyncError>(None);
        };
        let page = fetch(cursor).await?;
        let next = match (page.has_more, page.next_cursor) {
            (true, Some(next)) => Some(Some(next)),
            _ => None,
        };
        let items = stream::iter(page.results.into_iter().map(Ok::<T, SyncError>));
        Ok(Some((items, (fetch, next))))
    })
    .try_flatten()
}
