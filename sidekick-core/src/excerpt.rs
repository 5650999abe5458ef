use crate::model::LocalRecord;
use crate::render::markdown_to_text;
use crate::store::LocalBlock;

/// Paragraph text stops being collected once it exceeds this many characters.
pub const EXCERPT_LENGTH: usize = 200;

/// Short plain-text summary of a post or page.
///
/// The subtitle when there is one; otherwise the leading paragraph blocks,
/// with their inline markdown stripped.
pub fn excerpt(record: &LocalRecord, blocks: &[LocalBlock]) -> String {
    if let Some(subtitle) = record.text("subtitle") {
        return subtitle.to_string();
    }

    let mut text = String::new();
    for block in blocks.iter().filter(|b| b.block_type == "paragraph") {
        let Some(block_text) = block.properties.get("text").and_then(|t| t.as_str()) else {
            continue;
        };
        if block_text.is_empty() {
            continue;
        }
        text.push(' ');
        text.push_str(block_text);
        if text.chars().count() > EXCERPT_LENGTH {
            break;
        }
    }
    markdown_to_text(text.trim()).trim().to_string()
}
