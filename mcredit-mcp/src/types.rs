//! MCP result types and the handler calling convention.
//!
//! These are framework-agnostic representations of the MCP result payloads
//! the router emits. They serialize to the camelCase wire shape.

use std::fmt;

use mcredit::Arguments;
use serde::{Deserialize, Serialize};
use url::Url;

/// A single content item in a tool or prompt result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ContentItem {
    /// Text content.
    Text {
        /// The text value.
        text: String,
    },
    /// A link to a resource the client may read separately.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name.
        name: String,
        /// MIME type of the linked resource.
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Short description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl ContentItem {
    /// Creates a text content item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates a resource link.
    #[must_use]
    pub fn resource_link(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ResourceLink {
            uri: uri.into(),
            name: name.into(),
            mime_type: None,
            description: None,
        }
    }

    /// Returns the text if this is a text item.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ResourceLink { .. } => None,
        }
    }
}

/// Result of an MCP tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Content items returned by the tool.
    #[serde(default)]
    pub content: Vec<ContentItem>,
    /// Whether the tool reported an error.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    /// Optional structured content.
    #[serde(
        default,
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<serde_json::Value>,
}

impl CallToolResult {
    /// A successful result with the given content.
    #[must_use]
    pub const fn success(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            is_error: false,
            structured_content: None,
        }
    }

    /// A successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::success(vec![ContentItem::text(text)])
    }

    /// A tool-level error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: true,
            structured_content: None,
        }
    }
}

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceContents {
    /// The concrete resource URI.
    pub uri: String,
    /// MIME type of `text`.
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// The resource body.
    pub text: String,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Resource bodies.
    pub contents: Vec<ResourceContents>,
}

/// One message of a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Message body.
    pub content: ContentItem,
}

impl PromptMessage {
    /// A user message with text content.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_owned(),
            content: ContentItem::text(text),
        }
    }
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPromptResult {
    /// Optional description of the rendered prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prompt messages.
    pub messages: Vec<PromptMessage>,
}

/// The call-specific input a handler receives.
///
/// For tools and prompts `arguments` are the request arguments. For resources
/// they are the variables extracted from the URI template and `uri` is the
/// concrete URI that was requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    /// Named arguments or template variables.
    pub arguments: Arguments,
    /// The requested URI, for resources.
    pub uri: Option<Url>,
}

impl Invocation {
    /// An invocation carrying only arguments.
    #[must_use]
    pub const fn new(arguments: Arguments) -> Self {
        Self {
            arguments,
            uri: None,
        }
    }

    /// A resource invocation.
    #[must_use]
    pub const fn resource(uri: Url, variables: Arguments) -> Self {
        Self {
            arguments: variables,
            uri: Some(uri),
        }
    }

    /// Returns a string argument, unwrapping single-element arrays.
    #[must_use]
    pub fn argument_str(&self, name: &str) -> Option<&str> {
        match self.arguments.get(name)? {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Array(items) => items.first()?.as_str(),
            _ => None,
        }
    }
}

/// Failure reported by a wrapped handler.
///
/// The paywall never inspects or rewrites it; it is returned to the caller
/// as-is and suppresses settlement.
pub struct HandlerError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Creates a handler error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The handler's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
