//! Block converter: remote block documents → rendering-ready JSON payloads.
//!
//! The payload produced here is what gets stored verbatim in
//! `blocks.properties` and later handed to the templates by
//! [`crate::render`]. Child blocks are only listed when the parent reports
//! `has_children`, and only while that parent is being converted.

use futures::future::LocalBoxFuture;
use futures::TryStreamExt;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::contract::{MediaHandler, NotionApi};
use crate::error::{Result, SyncError};
use crate::property::plain_text;
use crate::remote::{paginate, RemoteBlock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockType {
    Paragraph,
    Heading1,
    Heading2,
    Heading3,
    BulletedListItem,
    NumberedListItem,
    Quote,
    Callout,
    Image,
    Video,
    Divider,
    Unsupported(String),
}

impl BlockType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "paragraph" => BlockType::Paragraph,
            "heading_1" => BlockType::Heading1,
            "heading_2" => BlockType::Heading2,
            "heading_3" => BlockType::Heading3,
            "bulleted_list_item" => BlockType::BulletedListItem,
            "numbered_list_item" => BlockType::NumberedListItem,
            "quote" => BlockType::Quote,
            "callout" => BlockType::Callout,
            "image" => BlockType::Image,
            "video" => BlockType::Video,
            "divider" => BlockType::Divider,
            other => BlockType::Unsupported(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            BlockType::Paragraph => "paragraph",
            BlockType::Heading1 => "heading_1",
            BlockType::Heading2 => "heading_2",
            BlockType::Heading3 => "heading_3",
            BlockType::BulletedListItem => "bulleted_list_item",
            BlockType::NumberedListItem => "numbered_list_item",
            BlockType::Quote => "quote",
            BlockType::Callout => "callout",
            BlockType::Image => "image",
            BlockType::Video => "video",
            BlockType::Divider => "divider",
            BlockType::Unsupported(tag) => tag,
        }
    }

    /// The list group a list item belongs to, e.g. `bulleted`.
    pub fn list_kind(&self) -> Option<&'static str> {
        match self {
            BlockType::BulletedListItem => Some("bulleted"),
            BlockType::NumberedListItem => Some("numbered"),
            _ => None,
        }
    }
}

/// Background colour → callout kind.
pub fn callout_kind(color: &str) -> Option<&'static str> {
    match color {
        "blue_background" | "pink_background" => Some("info"),
        "brown_background" | "orange_background" | "purple_background"
        | "yellow_background" => Some("warning"),
        "gray_background" => Some("light"),
        "green_background" => Some("success"),
        "red_background" => Some("danger"),
        _ => None,
    }
}

/// Format a rich text run list as inline markdown.
///
/// Code runs become `` `x` `` with no other emphasis; otherwise italic is
/// applied first and bold outside it (`**_x_**`). A link wraps whatever
/// emphasis was applied.
pub fn format_rich_text(runs: &Value) -> String {
    let Some(runs) = runs.as_array() else {
        return String::new();
    };
    let mut out = String::new();
    for run in runs {
        let text = run.get("text");
        let mut content = text
            .and_then(|t| t.get("content"))
            .or_else(|| run.get("plain_text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let annotations = run.get("annotations");
        let flag = |name: &str| {
            annotations
                .and_then(|a| a.get(name))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };

        if flag("code") {
            content = format!("`{content}`");
        } else {
            if flag("italic") {
                content = format!("_{content}_");
            }
            if flag("bold") {
                content = format!("**{content}**");
            }
        }

        let link = text
            .and_then(|t| t.get("link"))
            .and_then(|l| l.get("url"))
            .or_else(|| run.get("href"))
            .and_then(Value::as_str);
        if let Some(url) = link {
            content = format!("[{content}]({url})");
        }
        out.push_str(&content);
    }
    out
}

/// List every child of a block, following pagination cursors.
pub async fn fetch_children(api: &dyn NotionApi, block_id: &str) -> Result<Vec<RemoteBlock>> {
    paginate(move |cursor| api.list_block_children(block_id, cursor))
        .try_collect()
        .await
}

/// Converts blocks for one owning record.
pub struct BlockConverter<'a> {
    api: &'a dyn NotionApi,
    media: Option<&'a dyn MediaHandler>,
}

impl<'a> BlockConverter<'a> {
    pub fn new(api: &'a dyn NotionApi, media: Option<&'a dyn MediaHandler>) -> Self {
        Self { api, media }
    }

    /// Convert one block (and, lazily, its children) to its stored payload.
    pub fn convert<'b>(&'b self, block: &'b RemoteBlock) -> LocalBoxFuture<'b, Result<Value>> {
        Box::pin(async move {
            let block_type = BlockType::from_tag(&block.kind);
            debug!(block_id = %block.id, block_type = block_type.tag(), "Converting block");
            let payload = block.payload();
            match block_type {
                BlockType::Paragraph
                | BlockType::Heading1
                | BlockType::Heading2
                | BlockType::Heading3
                | BlockType::BulletedListItem
                | BlockType::NumberedListItem
                | BlockType::Quote => Ok(Value::Object(self.rich_text(block).await?)),
                BlockType::Callout => {
                    let mut emoji = Value::Null;
                    match payload.get("icon") {
                        None | Some(Value::Null) => {}
                        Some(icon) if icon.get("type").and_then(Value::as_str) == Some("emoji") => {
                            emoji = icon.get("emoji").cloned().unwrap_or(Value::Null);
                        }
                        Some(icon) => return Err(SyncError::UnhandledIcon(icon.clone())),
                    }
                    let kind = match payload.get("color").and_then(Value::as_str) {
                        Some(color) if !color.is_empty() && color != "default" => {
                            callout_kind(color)
                        }
                        _ => Some("info"),
                    };
                    let mut out = Map::new();
                    out.insert("kind".into(), json!(kind));
                    out.insert("icon".into(), Value::Null);
                    out.insert("emoji".into(), emoji);
                    out.extend(self.rich_text(block).await?);
                    Ok(Value::Object(out))
                }
                BlockType::Image => {
                    let url = file_url(block)?;
                    let alt = plain_text(payload.get("caption").unwrap_or(&Value::Null))
                        .unwrap_or_default();
                    let src = self.handle_media(url).await?;
                    Ok(json!({ "alt": alt, "src": src }))
                }
                BlockType::Video => {
                    let url = file_url(block)?;
                    let src = if payload.get("type").and_then(Value::as_str) == Some("external") {
                        url.to_string()
                    } else {
                        self.handle_media(url).await?
                    };
                    Ok(json!({ "src": src }))
                }
                BlockType::Divider => Ok(json!({})),
                BlockType::Unsupported(tag) => Err(SyncError::UnsupportedBlockType(tag)),
            }
        })
    }

    async fn rich_text(&self, block: &RemoteBlock) -> Result<Map<String, Value>> {
        let text = format_rich_text(block.payload().get("rich_text").unwrap_or(&Value::Null));
        let children = self.children(block).await?;
        let mut out = Map::new();
        out.insert("text".into(), Value::String(text));
        out.insert("children".into(), Value::Array(children));
        Ok(out)
    }

    async fn children(&self, block: &RemoteBlock) -> Result<Vec<Value>> {
        if !block.has_children {
            return Ok(Vec::new());
        }
        let children = fetch_children(self.api, &block.id).await?;
        let mut converted = Vec::with_capacity(children.len());
        for child in &children {
            converted.push(self.convert(child).await?);
        }
        Ok(converted)
    }

    async fn handle_media(&self, url: &str) -> Result<String> {
        match self.media {
            Some(handler) => handler.handle_media(url).await,
            None => Err(SyncError::MediaHandlerMissing(url.to_string())),
        }
    }
}

/// URL of a file-bearing block, from its `file` or `external` variant.
fn file_url(block: &RemoteBlock) -> Result<&str> {
    let payload = block.payload();
    let variant = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("file");
    payload
        .get(variant)
        .and_then(|v| v.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SyncError::MalformedDocument(format!("{} block {} has no url", block.kind, block.id))
        })
}
