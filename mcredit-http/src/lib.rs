//! HTTP plumbing for credit-metered MCP servers.
//!
//! # Modules
//!
//! - [`ledger_client`] - [`HttpLedger`], a [`Ledger`](mcredit::Ledger) backed by a remote HTTP API
//! - [`transport`] - axum routes serving an [`McpRouter`](mcredit_mcp::McpRouter)

pub mod ledger_client;
pub mod transport;

pub use ledger_client::{HttpLedger, HttpLedgerError};
pub use transport::{AmbientContextLayer, AmbientContextService, ContextMode, auth_headers, mcp_routes};
