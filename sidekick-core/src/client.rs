//! HTTP implementations of the remote collaborators.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use crate::contract::{MediaFetcher, NotionApi};
use crate::error::{Result, SyncError};
use crate::remote::{Paginated, RemoteBlock, RemoteDatabase, RemoteRecord, RemoteUser};

pub const NOTION_API_URL: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";

/// [`NotionApi`] over HTTPS.
#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl NotionClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, NOTION_API_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let api_key = api_key.into();
        info!(base_url = %base_url, api_key_set = !api_key.is_empty(), "Initialized Notion client");
        Self {
            http: Client::new(),
            base_url,
            api_key,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Notion API request failed");
            return Err(SyncError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl NotionApi for NotionClient {
    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<String>,
    ) -> Result<Paginated<RemoteRecord>> {
        debug!(database_id, cursor = ?cursor, "Querying database");
        let mut body = Map::new();
        if let Some(cursor) = cursor {
            body.insert("start_cursor".into(), Value::String(cursor));
        }
        self.send(
            self.request(Method::POST, &format!("/databases/{database_id}/query"))
                .json(&body),
        )
        .await
    }

    async fn list_block_children(
        &self,
        block_id: &str,
        cursor: Option<String>,
    ) -> Result<Paginated<RemoteBlock>> {
        debug!(block_id, cursor = ?cursor, "Listing block children");
        let mut request = self.request(Method::GET, &format!("/blocks/{block_id}/children"));
        if let Some(cursor) = cursor {
            request = request.query(&[("start_cursor", cursor)]);
        }
        self.send(request).await
    }

    async fn retrieve_page(&self, page_id: &str) -> Result<RemoteRecord> {
        self.send(self.request(Method::GET, &format!("/pages/{page_id}")))
            .await
    }

    async fn retrieve_user(&self, user_id: &str) -> Result<RemoteUser> {
        self.send(self.request(Method::GET, &format!("/users/{user_id}")))
            .await
    }

    async fn create_page(
        &self,
        database_id: &str,
        properties: Map<String, Value>,
    ) -> Result<RemoteRecord> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        self.send(self.request(Method::POST, "/pages").json(&body))
            .await
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: Map<String, Value>,
    ) -> Result<RemoteRecord> {
        let body = json!({ "properties": properties });
        self.send(
            self.request(Method::PATCH, &format!("/pages/{page_id}"))
                .json(&body),
        )
        .await
    }

    async fn retrieve_database(&self, database_id: &str) -> Result<RemoteDatabase> {
        self.send(self.request(Method::GET, &format!("/databases/{database_id}")))
            .await
    }
}

/// Plain GET downloader for media files.
#[derive(Clone, Default)]
pub struct HttpMediaFetcher {
    http: Client,
}

impl HttpMediaFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
