//! Tool output content and its conversion into tool-result blocks.
//!
//! A tool returns a list of [`ToolContent`] items. The orchestrator turns
//! them into the content of a single `ToolResult` block with
//! [`into_result_blocks`]: a success header first, then one block per item.

use crate::{ContentBlock, ImageSource};
use serde_json::Value;

/// One item of tool output.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    /// Plain text, passed through unchanged.
    Text(String),
    /// Base64 image data. The media type is detected when not given.
    Image {
        data: String,
        mime_type: Option<String>,
    },
    /// Any other structured output.
    Other(Value),
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn image(data: impl Into<String>) -> Self {
        Self::Image {
            data: data.into(),
            mime_type: None,
        }
    }

    /// Parse one item in the common tool-server shape
    /// (`{"type": "text", "text": ..}` or `{"type": "image", "data": .., "mimeType": ..}`).
    /// Anything else is kept as [`ToolContent::Other`].
    pub fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = value.get("text").and_then(Value::as_str) {
                    return Self::Text(text.to_string());
                }
            }
            Some("image") => {
                if let Some(data) = value.get("data").and_then(Value::as_str) {
                    return Self::Image {
                        data: data.to_string(),
                        mime_type: value
                            .get("mimeType")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    };
                }
            }
            _ => {}
        }
        Self::Other(value)
    }

    fn into_block(self) -> ContentBlock {
        match self {
            Self::Text(text) => ContentBlock::text(text),
            Self::Image { data, mime_type } => {
                let media_type = mime_type.unwrap_or_else(|| detect_image_format(&data).to_string());
                ContentBlock::Image {
                    source: ImageSource::base64(media_type, data),
                }
            }
            Self::Other(Value::String(s)) => ContentBlock::text(s),
            Self::Other(value) => ContentBlock::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            ),
        }
    }
}

/// Normalize raw tool-server output into content items.
///
/// Accepts a bare array of items or an object carrying a `content` array.
/// Any other shape becomes a single text item describing the problem.
pub fn parse_tool_output(tool_name: &str, output: Value) -> Vec<ToolContent> {
    let items = match output {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("content") {
            Some(Value::Array(items)) => items,
            other => {
                let shown = other.map_or_else(|| Value::Object(map), |v| v);
                return vec![unexpected_format(tool_name, &shown)];
            }
        },
        other => return vec![unexpected_format(tool_name, &other)],
    };
    items.into_iter().map(ToolContent::from_value).collect()
}

fn unexpected_format(tool_name: &str, value: &Value) -> ToolContent {
    ToolContent::Text(format!(
        "Tool \"{tool_name}\" returned unexpected result format: {value}"
    ))
}

/// Best-effort media type of base64 image data. Falls back to `image/png`.
pub fn detect_image_format(data: &str) -> &'static str {
    if data.starts_with("/9j/") {
        return "image/jpeg";
    }
    if data.starts_with("iVBORw0KGgo") {
        return "image/png";
    }

    use base64::Engine;
    // A 12-char prefix decodes to 9 bytes, enough for every signature below.
    let prefix = data.get(..12).unwrap_or(data);
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(prefix) else {
        return "image/png";
    };
    match bytes.as_slice() {
        [0x89, 0x50, 0x4E, 0x47, ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x52, 0x49, 0x46, 0x46, ..] => "image/webp",
        _ => "image/png",
    }
}

/// Content of a successful `ToolResult` block for `tool_name`.
pub fn into_result_blocks(tool_name: &str, items: Vec<ToolContent>) -> Vec<ContentBlock> {
    if items.is_empty() {
        return vec![ContentBlock::text(format!(
            "No results retrieved from {tool_name}"
        ))];
    }
    let mut blocks = Vec::with_capacity(items.len() + 1);
    blocks.push(ContentBlock::text(format!(
        "Tool \"{tool_name}\" executed successfully. Results:"
    )));
    blocks.extend(items.into_iter().map(ToolContent::into_block));
    blocks
}

/// Content of a failed `ToolResult` block for `tool_name`.
pub fn error_result_text(tool_name: &str, error: &impl std::fmt::Display) -> String {
    format!("Error when calling tool {tool_name}, error: {error}")
}
