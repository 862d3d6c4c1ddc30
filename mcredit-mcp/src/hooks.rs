//! Paywall observability hooks.
//!
//! Billing faults never reach the caller; they are reported here instead,
//! alongside denials and successful settlements. All methods default to
//! no-ops, so implementors override only what they need.

use mcredit::{BoxFuture, InvocationDescriptor, RedeemReceipt, SettlementRequest};

use crate::error::Denial;
use crate::settlement::Unsettled;

/// Identifies the call a hook fires for.
#[derive(Debug, Clone, Copy)]
pub struct CallInfo<'a> {
    /// The wrapped handler's descriptor.
    pub descriptor: &'a InvocationDescriptor,
    /// The id the call is metered under.
    pub logical_resource_id: &'a str,
}

/// Callbacks fired by the paywall.
pub trait PaywallHooks: Send + Sync {
    /// A call was refused before its handler ran.
    fn on_denied<'a>(&'a self, _call: CallInfo<'a>, _denial: &'a Denial) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Credits were redeemed for a call.
    fn after_settle<'a>(
        &'a self,
        _call: CallInfo<'a>,
        _request: &'a SettlementRequest,
        _receipt: &'a RedeemReceipt,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// A call completed but could not be billed.
    fn on_unsettled<'a>(
        &'a self,
        _call: CallInfo<'a>,
        _unsettled: &'a Unsettled,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// No-op [`PaywallHooks`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPaywallHooks;

impl PaywallHooks for NoPaywallHooks {}
