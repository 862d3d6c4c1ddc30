#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for credit-metered MCP paywalls.
//!
//! This crate provides the protocol-agnostic building blocks used by the
//! paywall layer: per-call invocation context, handler descriptors, cost
//! specifications, the external credit ledger abstraction and the wire-level
//! error taxonomy.
//!
//! # Overview
//!
//! A paywalled invocation authenticates the caller's bearer token, opens an
//! accounting record on the ledger (`start_processing_request`), runs the
//! handler, computes its cost and closes the record by redeeming credits.
//! The orchestration itself lives in `mcredit-mcp`; this crate only defines
//! the vocabulary it speaks.
//!
//! # Modules
//!
//! - [`access`] - Access validation against the ledger
//! - [`context`] - Bearer token extraction and per-call invocation context
//! - [`cost`] - Cost specifications and the cost resolver
//! - [`descriptor`] - Static handler descriptors (kind, name, cost)
//! - [`error`] - Error types shared across the workspace
//! - [`hooks`] - Lifecycle hooks around ledger operations
//! - [`jsonrpc`] - JSON-RPC envelopes and wire error codes
//! - [`ledger`] - The ledger trait and its request/response types
//! - [`memory`] - In-process ledger for local runs and tests

pub mod access;
pub mod context;
pub mod cost;
pub mod descriptor;
pub mod error;
pub mod hooks;
pub mod jsonrpc;
pub mod ledger;
pub mod memory;

pub use access::{AccessDecision, AccessValidator, DenialReason, GrantedAccess};
pub use context::{AuthHeaders, ContextHandle, InvocationContext};
pub use cost::{CostResolver, CostSpec, PostCallContext, PreCallContext};
pub use descriptor::{InvocationDescriptor, InvocationKind};
pub use error::{ContextError, CostError, DescriptorError, LedgerError};
pub use hooks::{FailureRecovery, HookDecision, HookedLedger, LedgerHooks};
pub use jsonrpc::{ErrorReason, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use ledger::{
    AccessToken, Balance, BoxFuture, Ledger, RedeemReceipt, SettlementRequest, StartRequest,
    StartedRequest,
};
pub use memory::InMemoryLedger;

/// Argument map passed to tool and prompt handlers (template variables for resources).
pub type Arguments = serde_json::Map<String, serde_json::Value>;
