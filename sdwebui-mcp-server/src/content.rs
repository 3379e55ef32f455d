//! Protocol-neutral tool results.
//!
//! Tool handlers assemble a [`ToolResult`] - an ordered list of tagged
//! content items plus an error flag - and the gateway converts it into the
//! MCP content representation at the dispatch boundary. Pure conversion, no
//! I/O.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rmcp::model::{CallToolResult, Content};
use tracing::warn;

/// One unit of tool output.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    /// Plain text
    Text {
        /// The text body
        text: String,
    },
    /// An inline image
    Image {
        /// Base64-encoded image bytes
        data: String,
        /// MIME type of the image
        mime_type: String,
    },
}

impl ContentItem {
    /// Create a text item.
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    /// Create an image item from base64 data and a MIME type.
    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentItem::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Convert into the MCP content representation.
    ///
    /// Image data must be valid base64; a malformed payload degrades to a
    /// descriptive text item in place so the rest of the result survives.
    fn into_content(self) -> Content {
        match self {
            ContentItem::Text { text } => Content::text(text),
            ContentItem::Image { data, mime_type } => match BASE64.decode(data.as_bytes()) {
                Ok(_) => Content::image(data, mime_type),
                Err(e) => {
                    warn!(error = %e, "Failed to decode image content");
                    Content::text(format!("Failed to decode image data: {e}"))
                }
            },
        }
    }
}

/// Result of one tool invocation.
///
/// If `is_error` is set, `content` contains at least one human-readable
/// text item describing the failure. Item order is preserved end-to-end.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Ordered content items
    pub content: Vec<ContentItem>,
    /// Whether this result reports a failure
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful result from content items.
    pub fn success(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Create an error result carrying a single descriptive text item.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: true,
        }
    }

    /// Convert into the MCP call result, item order preserved.
    pub fn into_call_tool_result(self) -> CallToolResult {
        let content: Vec<Content> = self
            .content
            .into_iter()
            .map(ContentItem::into_content)
            .collect();

        if self.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}
