//! Static handler descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cost::CostSpec;

/// The HTTP verb reported to the ledger when none is configured.
pub const DEFAULT_HTTP_VERB: &str = "POST";

/// Which kind of MCP endpoint a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationKind {
    /// A callable tool (`tools/call`).
    Tool,
    /// A URI-addressed resource (`resources/read`).
    Resource,
    /// A prompt template (`prompts/get`).
    Prompt,
}

impl InvocationKind {
    /// Returns the lowercase kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Prompt => "prompt",
        }
    }

    /// Returns the plural path segment used in logical resource ids.
    #[must_use]
    pub const fn collection(&self) -> &'static str {
        match self {
            Self::Tool => "tools",
            Self::Resource => "resources",
            Self::Prompt => "prompts",
        }
    }
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static configuration a handler is registered with.
///
/// Built once at wiring time and shared read-only by every call to the
/// handler.
#[derive(Debug, Clone)]
pub struct InvocationDescriptor {
    /// Endpoint kind.
    pub kind: InvocationKind,
    /// Logical handler name, e.g. `weather.today`.
    pub name: String,
    /// How many credits one call costs.
    pub cost: CostSpec,
    /// Whether a cancelled stream is billed for the chunks already delivered.
    pub bill_partial_streams: bool,
}

impl InvocationDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(kind: InvocationKind, name: impl Into<String>, cost: CostSpec) -> Self {
        Self {
            kind,
            name: name.into(),
            cost,
            bill_partial_streams: false,
        }
    }

    /// Tool descriptor shorthand.
    #[must_use]
    pub fn tool(name: impl Into<String>, cost: CostSpec) -> Self {
        Self::new(InvocationKind::Tool, name, cost)
    }

    /// Resource descriptor shorthand.
    #[must_use]
    pub fn resource(name: impl Into<String>, cost: CostSpec) -> Self {
        Self::new(InvocationKind::Resource, name, cost)
    }

    /// Prompt descriptor shorthand.
    #[must_use]
    pub fn prompt(name: impl Into<String>, cost: CostSpec) -> Self {
        Self::new(InvocationKind::Prompt, name, cost)
    }

    /// Bills cancelled streams for what was delivered before cancellation.
    #[must_use]
    pub const fn with_partial_billing(mut self) -> Self {
        self.bill_partial_streams = true;
        self
    }

    /// The logical resource id the ledger meters this handler under:
    /// `mcp://{server}/{tools|resources|prompts}/{name}`.
    #[must_use]
    pub fn logical_resource_id(&self, server_name: &str) -> String {
        format!(
            "mcp://{server_name}/{}/{}",
            self.kind.collection(),
            self.name
        )
    }
}
