#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Credit-metered paywall for MCP servers.
//!
//! Wrap tool, resource and prompt handlers with a [`Paywall`] and every call
//! is authenticated against the credit ledger, run, priced and settled
//! before the result leaves the server.
//!
//! # Server Usage
//!
//! ```rust,ignore
//! use mcredit::{CostSpec, InvocationDescriptor};
//! use mcredit_mcp::{McpRouter, Paywall, PaywallConfig, ToolSpec};
//!
//! let paywall = Paywall::new(ledger, PaywallConfig::new(agent_id, "weather-mcp"));
//! let today = paywall.wrap(
//!     weather_today,
//!     InvocationDescriptor::tool("weather.today", CostSpec::Constant(1)),
//! )?;
//!
//! let router = McpRouter::new("weather-mcp", "0.1.0")
//!     .tool(ToolSpec::new("weather.today", "Today's weather"), today);
//!
//! let response = router.handle_bytes(body, Some(headers)).await;
//! ```
//!
//! # Context modes
//!
//! In explicit mode the transport passes request headers with every call.
//! In ambient mode it passes `None` and the [`ContextResolver`] reads the
//! headers of the request currently being served from a
//! [`ContextAccessor`], typically the task-local [`TaskLocalAccessor`].
//!
//! # Modules
//!
//! - [`error`] - Paywall errors and their JSON-RPC mapping
//! - [`hooks`] - Callbacks for denials and settlement results
//! - [`paywall`] - The paywall and unary wrapped handlers
//! - [`resolver`] - Explicit and ambient context resolution
//! - [`router`] - JSON-RPC dispatch for tools, resources and prompts
//! - [`settlement`] - Credit redemption and its outcomes
//! - [`stream`] - Streaming handlers
//! - [`template`] - URI templates for resources
//! - [`types`] - MCP result types and the handler calling convention

pub mod error;
pub mod hooks;
pub mod paywall;
pub mod resolver;
pub mod router;
pub mod settlement;
pub mod stream;
pub mod template;
pub mod types;

pub use error::{Denial, PaywallError};
pub use hooks::{CallInfo, NoPaywallHooks, PaywallHooks};
pub use paywall::{Paywall, PaywallConfig, Paywalled, Settled};
pub use resolver::{AmbientRequest, ContextAccessor, ContextResolver, TaskLocalAccessor};
pub use router::{McpRouter, PromptArgument, PromptSpec, ResourceSpec, ToolSpec};
pub use settlement::{SettlementClient, SettlementOutcome, Unsettled, UnsettledCause, ZeroCostPolicy};
pub use stream::{ChunkStream, PaywalledStream, StreamSummary};
pub use template::{TemplateError, UriTemplate};
pub use types::{
    CallToolResult, ContentItem, GetPromptResult, HandlerError, Invocation, PromptMessage,
    ReadResourceResult, ResourceContents,
};
