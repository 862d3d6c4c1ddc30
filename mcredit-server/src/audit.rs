//! Ledger audit logging.

use mcredit::{
    BoxFuture, FailureRecovery, LedgerError, LedgerHooks, RedeemReceipt, SettlementRequest,
    StartRequest, StartedRequest,
};

/// Logs every ledger round-trip the paywall makes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerAudit;

impl LedgerHooks for LedgerAudit {
    fn after_start<'a>(
        &'a self,
        request: &'a StartRequest,
        result: &'a StartedRequest,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(
                endpoint = %request.endpoint,
                agent_request_id = %result.agent_request_id,
                balance = result.balance.balance,
                "accounting record opened"
            );
        })
    }

    fn after_redeem<'a>(
        &'a self,
        request: &'a SettlementRequest,
        receipt: &'a RedeemReceipt,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(
                agent_request_id = %request.agent_request_id,
                credits = receipt.credits_redeemed,
                tx = receipt.tx_hash.as_deref().unwrap_or("-"),
                "credits redeemed"
            );
        })
    }

    fn on_redeem_failure<'a>(
        &'a self,
        request: &'a SettlementRequest,
        error: &'a LedgerError,
    ) -> BoxFuture<'a, FailureRecovery<RedeemReceipt>> {
        Box::pin(async move {
            tracing::error!(
                agent_request_id = %request.agent_request_id,
                credits = request.credits,
                %error,
                "redemption failed"
            );
            FailureRecovery::Propagate
        })
    }
}
