//! The external credit ledger.
//!
//! The paywall never stores balances itself. It relies on three primitive
//! operations of a ledger service, modelled by the [`Ledger`] trait:
//!
//! - [`Ledger::get_access_token`] - client side only, exchanges a plan
//!   subscription for a bearer token
//! - [`Ledger::start_processing_request`] - verifies a token and opens an
//!   accounting record (`agent_request_id`)
//! - [`Ledger::redeem_credits`] - burns credits and closes the record
//!
//! All methods return [`BoxFuture`] so the trait stays object-safe and can be
//! shared as `Arc<dyn Ledger>`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A boxed, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request to open an accounting record for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// The agent whose plan is being consumed.
    pub agent_id: String,
    /// The caller's bearer token.
    pub token: String,
    /// Logical resource id of the invoked handler.
    pub endpoint: String,
    /// HTTP verb the invocation is metered under.
    pub http_verb: String,
}

/// The caller's plan balance as reported by the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Whether the caller holds a subscription to the agent's plan.
    pub is_subscriber: bool,
    /// Remaining credits.
    #[serde(default)]
    pub balance: u64,
    /// The plan the balance belongs to, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

/// A successfully opened accounting record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRequest {
    /// Per-invocation accounting handle, closed by settlement.
    pub agent_request_id: String,
    /// The caller's balance at validation time.
    pub balance: Balance,
}

/// Credits to burn against an open accounting record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    /// The record opened by [`Ledger::start_processing_request`].
    pub agent_request_id: String,
    /// The caller's bearer token.
    pub token: String,
    /// Credits to redeem.
    pub credits: u64,
}

/// Confirmation of a redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemReceipt {
    /// Whether the ledger accepted the redemption.
    pub success: bool,
    /// Credits actually burned.
    #[serde(default)]
    pub credits_redeemed: u64,
    /// Ledger-side transaction reference, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// An agent access token issued to a plan subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// The bearer token to present to the agent.
    pub access_token: String,
}

/// Operations the paywall needs from the external credit ledger.
///
/// Implementations own all balance bookkeeping; the paywall issues at most
/// one `start_processing_request` and one successful `redeem_credits` per
/// validated call.
pub trait Ledger: Send + Sync {
    /// Exchanges a plan subscription for an agent access token.
    fn get_access_token<'a>(
        &'a self,
        plan_id: &'a str,
        agent_id: &'a str,
    ) -> BoxFuture<'a, Result<AccessToken, LedgerError>>;

    /// Verifies the token and opens an accounting record.
    fn start_processing_request<'a>(
        &'a self,
        request: &'a StartRequest,
    ) -> BoxFuture<'a, Result<StartedRequest, LedgerError>>;

    /// Burns credits and closes the accounting record.
    fn redeem_credits<'a>(
        &'a self,
        request: &'a SettlementRequest,
    ) -> BoxFuture<'a, Result<RedeemReceipt, LedgerError>>;
}

impl<T: Ledger + ?Sized> Ledger for Arc<T> {
    fn get_access_token<'a>(
        &'a self,
        plan_id: &'a str,
        agent_id: &'a str,
    ) -> BoxFuture<'a, Result<AccessToken, LedgerError>> {
        (**self).get_access_token(plan_id, agent_id)
    }

    fn start_processing_request<'a>(
        &'a self,
        request: &'a StartRequest,
    ) -> BoxFuture<'a, Result<StartedRequest, LedgerError>> {
        (**self).start_processing_request(request)
    }

    fn redeem_credits<'a>(
        &'a self,
        request: &'a SettlementRequest,
    ) -> BoxFuture<'a, Result<RedeemReceipt, LedgerError>> {
        (**self).redeem_credits(request)
    }
}
