//! Lifecycle hooks for ledger operations.
//!
//! Hooks intercept `start_processing_request` and `redeem_credits` at three
//! points in their lifecycle:
//!
//! - **Before**: inspect or abort the operation before it reaches the ledger
//! - **After**: observe the result of a successful operation
//! - **On Failure**: observe or recover from a failed operation
//!
//! Hooks are defined via the [`LedgerHooks`] trait, which has default no-op
//! implementations for all methods. The [`HookedLedger`] decorator wraps any
//! [`Ledger`] and applies registered hooks around its calls.

use std::fmt::{self, Debug};

use crate::error::LedgerError;
use crate::ledger::{
    AccessToken, BoxFuture, Ledger, RedeemReceipt, SettlementRequest, StartRequest,
    StartedRequest,
};

/// Decision returned by "before" hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Allow the operation to proceed.
    Continue,
    /// Abort the operation.
    Abort {
        /// Machine-readable reason (e.g. `"rate_limited"`).
        reason: String,
        /// Human-readable message.
        message: String,
    },
}

/// Decision returned by "on failure" hooks.
#[derive(Debug)]
pub enum FailureRecovery<T> {
    /// Propagate the original error.
    Propagate,
    /// Substitute a result for the error.
    Recovered(T),
}

/// Lifecycle hooks for ledger calls.
///
/// All methods default to no-ops. This trait is dyn-compatible.
///
/// 1. **`before_*`** runs first and can abort with a reason.
/// 2. The inner ledger executes.
/// 3. **`after_*`** observes a successful result.
/// 4. **`on_*_failure`** can recover from an error with a substitute result.
pub trait LedgerHooks: Send + Sync {
    /// Called before an accounting record is opened.
    fn before_start<'a>(&'a self, _request: &'a StartRequest) -> BoxFuture<'a, HookDecision> {
        Box::pin(async { HookDecision::Continue })
    }

    /// Called after an accounting record was opened.
    fn after_start<'a>(
        &'a self,
        _request: &'a StartRequest,
        _result: &'a StartedRequest,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Called when opening an accounting record failed.
    fn on_start_failure<'a>(
        &'a self,
        _request: &'a StartRequest,
        _error: &'a LedgerError,
    ) -> BoxFuture<'a, FailureRecovery<StartedRequest>> {
        Box::pin(async { FailureRecovery::Propagate })
    }

    /// Called before credits are redeemed.
    fn before_redeem<'a>(&'a self, _request: &'a SettlementRequest) -> BoxFuture<'a, HookDecision> {
        Box::pin(async { HookDecision::Continue })
    }

    /// Called after credits were redeemed.
    fn after_redeem<'a>(
        &'a self,
        _request: &'a SettlementRequest,
        _receipt: &'a RedeemReceipt,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Called when a redemption failed.
    fn on_redeem_failure<'a>(
        &'a self,
        _request: &'a SettlementRequest,
        _error: &'a LedgerError,
    ) -> BoxFuture<'a, FailureRecovery<RedeemReceipt>> {
        Box::pin(async { FailureRecovery::Propagate })
    }
}

/// A ledger decorator that runs [`LedgerHooks`] around every call.
///
/// Hooks execute in registration order:
/// - **Before hooks**: first abort wins, remaining hooks are skipped.
/// - **After hooks**: all hooks run.
/// - **Failure hooks**: first recovery wins, remaining hooks are skipped.
///
/// `get_access_token` is passed straight through.
pub struct HookedLedger<L> {
    inner: L,
    hooks: Vec<Box<dyn LedgerHooks>>,
}

impl<L: Debug> Debug for HookedLedger<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookedLedger")
            .field("inner", &self.inner)
            .field("hooks", &format!("[{} hooks]", self.hooks.len()))
            .finish()
    }
}

impl<L> HookedLedger<L> {
    /// Wraps a ledger with hook support.
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            hooks: Vec::new(),
        }
    }

    /// Registers a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: impl LedgerHooks + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Adds a hook after construction.
    pub fn add_hook(&mut self, hook: impl LedgerHooks + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Returns the number of registered hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Returns the wrapped ledger.
    #[must_use]
    pub const fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: Ledger> Ledger for HookedLedger<L> {
    fn get_access_token<'a>(
        &'a self,
        plan_id: &'a str,
        agent_id: &'a str,
    ) -> BoxFuture<'a, Result<AccessToken, LedgerError>> {
        self.inner.get_access_token(plan_id, agent_id)
    }

    fn start_processing_request<'a>(
        &'a self,
        request: &'a StartRequest,
    ) -> BoxFuture<'a, Result<StartedRequest, LedgerError>> {
        Box::pin(async move {
            for hook in &self.hooks {
                if let HookDecision::Abort { reason, message } = hook.before_start(request).await {
                    tracing::debug!(endpoint = %request.endpoint, %reason, "start aborted by hook");
                    return Err(LedgerError::Aborted { reason, message });
                }
            }

            match self.inner.start_processing_request(request).await {
                Ok(started) => {
                    for hook in &self.hooks {
                        hook.after_start(request, &started).await;
                    }
                    Ok(started)
                }
                Err(e) => {
                    for hook in &self.hooks {
                        if let FailureRecovery::Recovered(started) =
                            hook.on_start_failure(request, &e).await
                        {
                            tracing::debug!(error = %e, "start failure recovered by hook");
                            return Ok(started);
                        }
                    }
                    Err(e)
                }
            }
        })
    }

    fn redeem_credits<'a>(
        &'a self,
        request: &'a SettlementRequest,
    ) -> BoxFuture<'a, Result<RedeemReceipt, LedgerError>> {
        Box::pin(async move {
            for hook in &self.hooks {
                if let HookDecision::Abort { reason, message } = hook.before_redeem(request).await
                {
                    tracing::debug!(
                        agent_request_id = %request.agent_request_id,
                        %reason,
                        "redeem aborted by hook"
                    );
                    return Err(LedgerError::Aborted { reason, message });
                }
            }

            match self.inner.redeem_credits(request).await {
                Ok(receipt) => {
                    for hook in &self.hooks {
                        hook.after_redeem(request, &receipt).await;
                    }
                    Ok(receipt)
                }
                Err(e) => {
                    for hook in &self.hooks {
                        if let FailureRecovery::Recovered(receipt) =
                            hook.on_redeem_failure(request, &e).await
                        {
                            tracing::debug!(error = %e, "redeem failure recovered by hook");
                            return Ok(receipt);
                        }
                    }
                    Err(e)
                }
            }
        })
    }
}
