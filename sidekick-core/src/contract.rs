//! # contract: interfaces to the collaborators the core depends on
//!
//! The sync engine never talks to the network, the filesystem or a mail
//! provider directly. It goes through the traits below, which are
//! implemented by real clients (see [`crate::client`]) and by `mockall`
//! mocks in tests.
//!
//! - [`NotionApi`]: the remote document service (databases, pages, blocks, users).
//! - [`MediaFetcher`]: downloads remote media bytes for attachment mirroring.
//! - [`MediaHandler`]: per-record strategy that maps a remote media URL to a
//!   stable local storage path (see [`crate::attachment::RecordMedia`]).
//! - [`TemplateRenderer`]: renders one named block template.
//! - [`Mailer`]: delivers a rendered newsletter digest.
//!
//! Mocks are exported under the `test-export-mocks` feature so that
//! integration tests in `tests/` can use them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::error::Result;
use crate::remote::{Paginated, RemoteBlock, RemoteDatabase, RemoteRecord, RemoteUser};

/// Client for the remote workspace.
///
/// Paginated endpoints return a single page; wrap them with
/// [`crate::remote::paginate`] to walk all pages lazily.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait NotionApi: Send + Sync {
    /// Query one page of rows from a database.
    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<String>,
    ) -> Result<Paginated<RemoteRecord>>;

    /// List one page of the children of a block (or of a page).
    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<String>,
    ) -> Result<Paginated<RemoteBlock>>;

    async fn retrieve_page(&self, page_id: &str) -> Result<RemoteRecord>;

    async fn retrieve_user(&self, user_id: &str) -> Result<RemoteUser>;

    /// Create a page in `database_id` with the given property payloads
    /// (keyed by property id).
    async fn create_page(
        &self,
        database_id: &str,
        properties: Map<String, Value>,
    ) -> Result<RemoteRecord>;

    async fn update_page(
        &self,
        page_id: &str,
        properties: Map<String, Value>,
    ) -> Result<RemoteRecord>;

    /// Fetch a database's property schema.
    async fn retrieve_database(&self, database_id: &str) -> Result<RemoteDatabase>;
}

/// Downloads the bytes behind a media URL.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Maps a remote media URL to a local storage path, persisting the media
/// on first sight.
///
/// Implementations must be idempotent: the same URL always yields the same
/// path. They typically borrow the open per-record transaction, so the
/// futures are not `Send`.
#[async_trait(?Send)]
pub trait MediaHandler {
    async fn handle_media(&self, url: &str) -> Result<String>;
}

/// Renders a named template with a JSON context.
///
/// Block templates are named `{type}_block` and list templates
/// `{kind}_list_block`. Unknown names fail with
/// [`crate::error::SyncError::TemplateNotFound`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait TemplateRenderer {
    fn render(&self, name: &str, context: &Value) -> Result<String>;
}

/// One post listed in a digest.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestPost {
    pub pk: i64,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub published: DateTime<Utc>,
}

/// A digest ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub recipient_name: Option<String>,
    pub recipient_email: String,
    /// Name used in the greeting ("there" when unknown).
    pub greeting_name: String,
    pub posts: Vec<DigestPost>,
}

/// Outbound email delivery.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_digest(&self, digest: &Digest) -> Result<()>;
}
