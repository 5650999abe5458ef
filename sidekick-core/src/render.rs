//! Block renderer: stored blocks → one markup string.
//!
//! [`render_blocks`] walks the blocks once, grouping runs of list items of
//! the same kind into a single list template. Every other block goes
//! through its own `{type}_block` template. Outside simple mode each piece
//! is wrapped in a `div` whose class names the block type.
//!
//! [`HtmlTemplates`] is the built-in [`TemplateRenderer`]. It turns the
//! inline markdown stored by the block converter into HTML.

use pulldown_cmark::{html, Event, Parser};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::block::BlockType;
use crate::contract::TemplateRenderer;
use crate::error::{Result, SyncError};
use crate::store::LocalBlock;

/// Render `blocks` (already in display order) with `templates`.
pub fn render_blocks(
    blocks: &[LocalBlock],
    templates: &dyn TemplateRenderer,
    simple: bool,
) -> Result<String> {
    let mut out = String::new();
    let mut active: Option<&'static str> = None;
    let mut items: Vec<Value> = Vec::new();

    for block in blocks {
        let block_type = BlockType::from_tag(&block.block_type);
        if let Some(kind) = block_type.list_kind() {
            if active != Some(kind) {
                flush_list(&mut out, &mut active, &mut items, templates, simple)?;
                active = Some(kind);
            }
            items.push(block.properties.clone());
            continue;
        }

        flush_list(&mut out, &mut active, &mut items, templates, simple)?;
        let mut context = match &block.properties {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        context.insert("simple".into(), Value::Bool(simple));
        let markup = templates.render(
            &format!("{}_block", block.block_type),
            &Value::Object(context),
        )?;
        if simple {
            out.push_str(&markup);
        } else {
            out.push_str(&format!(
                "<div class=\"{}-block\">{markup}</div>",
                block.block_type.replace('_', "-")
            ));
        }
    }

    flush_list(&mut out, &mut active, &mut items, templates, simple)?;
    Ok(out)
}

fn flush_list(
    out: &mut String,
    active: &mut Option<&'static str>,
    items: &mut Vec<Value>,
    templates: &dyn TemplateRenderer,
    simple: bool,
) -> Result<()> {
    let Some(kind) = active.take() else {
        return Ok(());
    };
    let context = json!({ "items": std::mem::take(items), "simple": simple });
    let markup = templates.render(&format!("{kind}_list_block"), &context)?;
    if simple {
        out.push_str(&markup);
    } else {
        out.push_str(&format!("<div class=\"{kind}-list-block\">{markup}</div>"));
    }
    Ok(())
}

/// Markdown to HTML.
pub fn markdown_to_html(text: &str) -> String {
    let mut out = String::new();
    html::push_html(&mut out, Parser::new(text));
    out
}

/// Markdown to HTML without the enclosing paragraph, for inline contexts.
pub fn inline_html(text: &str) -> String {
    let rendered = markdown_to_html(text);
    let trimmed = rendered.trim_end();
    match trimmed
        .strip_prefix("<p>")
        .and_then(|s| s.strip_suffix("</p>"))
    {
        Some(inner) if !inner.contains("<p>") => inner.to_string(),
        _ => trimmed.to_string(),
    }
}

/// Markdown reduced to its plain text.
pub fn markdown_to_text(text: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(text) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            _ => {}
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn field<'v>(context: &'v Value, key: &str) -> &'v str {
    context.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Built-in HTML templates for every supported block type.
///
/// Stored media paths are relative to the media root; `media_url` is
/// prepended to them (absolute URLs pass through).
#[derive(Debug, Clone)]
pub struct HtmlTemplates {
    pub media_url: String,
}

impl Default for HtmlTemplates {
    fn default() -> Self {
        Self {
            media_url: "/media/".to_string(),
        }
    }
}

impl HtmlTemplates {
    pub fn new(media_url: impl Into<String>) -> Self {
        Self {
            media_url: media_url.into(),
        }
    }

    fn media(&self, src: &str) -> String {
        if src.starts_with("http://") || src.starts_with("https://") {
            src.to_string()
        } else {
            format!("{}{}", self.media_url, src)
        }
    }

    /// Nested children of a rich text block, as list items or paragraphs.
    fn children(context: &Value, as_list: bool) -> String {
        let Some(children) = context.get("children").and_then(Value::as_array) else {
            return String::new();
        };
        if children.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for child in children {
            let text = field(child, "text");
            let nested = Self::children(child, as_list);
            if as_list {
                out.push_str(&format!("<li>{}{nested}</li>", inline_html(text)));
            } else {
                out.push_str(&markdown_to_html(text));
                out.push_str(&nested);
            }
        }
        if as_list {
            format!("<ul>{out}</ul>")
        } else {
            out
        }
    }

    fn list(&self, tag: &str, context: &Value) -> String {
        let items = context
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let body: String = items
            .iter()
            .map(|item| {
                format!(
                    "<li>{}{}</li>",
                    inline_html(field(item, "text")),
                    Self::children(item, true)
                )
            })
            .collect();
        format!("<{tag}>{body}</{tag}>")
    }
}

impl TemplateRenderer for HtmlTemplates {
    fn render(&self, name: &str, context: &Value) -> Result<String> {
        let simple = context.get("simple").and_then(Value::as_bool).unwrap_or(false);
        let text = field(context, "text");
        let html = match name {
            "paragraph_block" => {
                format!("{}{}", markdown_to_html(text), Self::children(context, false))
            }
            "heading_1_block" => format!("<h1>{}</h1>", inline_html(text)),
            "heading_2_block" => format!("<h2>{}</h2>", inline_html(text)),
            "heading_3_block" => format!("<h3>{}</h3>", inline_html(text)),
            "quote_block" => format!(
                "<blockquote>{}{}</blockquote>",
                markdown_to_html(text),
                Self::children(context, false)
            ),
            "callout_block" => {
                let body = format!("{}{}", markdown_to_html(text), Self::children(context, false));
                if simple {
                    format!("<div class=\"callout\">{body}</div>")
                } else {
                    let kind = context.get("kind").and_then(Value::as_str);
                    let class = kind.map_or("alert".to_string(), |k| format!("alert alert-{k}"));
                    let emoji = match context.get("emoji").and_then(Value::as_str) {
                        Some(e) => format!("<span class=\"callout-emoji\">{e}</span>"),
                        None => String::new(),
                    };
                    format!("<div class=\"{class}\" role=\"alert\">{emoji}{body}</div>")
                }
            }
            "image_block" => {
                let src = escape_attr(&self.media(field(context, "src")));
                let alt = field(context, "alt");
                if alt.is_empty() {
                    format!("<figure><img src=\"{src}\" alt=\"\"></figure>")
                } else {
                    format!(
                        "<figure><img src=\"{src}\" alt=\"{}\"><figcaption>{}</figcaption></figure>",
                        escape_attr(alt),
                        inline_html(alt)
                    )
                }
            }
            "video_block" => {
                let src = escape_attr(&self.media(field(context, "src")));
                if simple {
                    format!("<p><a href=\"{src}\">{src}</a></p>")
                } else {
                    format!("<video controls preload=\"metadata\" src=\"{src}\"></video>")
                }
            }
            "divider_block" => "<hr>".to_string(),
            "bulleted_list_block" => self.list("ul", context),
            "numbered_list_block" => self.list("ol", context),
            other => return Err(SyncError::TemplateNotFound(other.to_string())),
        };
        debug!(template = name, simple, "Rendered template");
        Ok(html)
    }
}
