//! Credit settlement.
//!
//! [`SettlementClient`] closes the accounting record opened during access
//! validation by redeeming the resolved cost. A transient ledger failure is
//! retried once, immediately; whatever happens afterwards is reported as a
//! [`SettlementOutcome`] and never changes the value returned to the caller.

use std::fmt;
use std::sync::Arc;

use mcredit::{CostError, Ledger, LedgerError, RedeemReceipt, SettlementRequest};
use serde::{Deserialize, Serialize};

/// What to do with calls that resolve to zero credits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroCostPolicy {
    /// Redeem zero credits so the ledger still closes the record.
    #[default]
    Redeem,
    /// Skip the ledger round-trip entirely.
    Skip,
}

/// Why a validated call was not billed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnsettledCause {
    /// The cost function failed.
    #[error("cost could not be computed: {0}")]
    Cost(#[from] CostError),
    /// Redemption failed, after the retry if one was made.
    #[error("redemption failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// A validated call that ended without a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsettled {
    /// The accounting record left open.
    pub agent_request_id: String,
    /// The resolved cost, when it could be computed.
    pub credits: Option<u64>,
    /// What went wrong.
    pub cause: UnsettledCause,
}

impl fmt::Display for Unsettled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} left unsettled: {}", self.agent_request_id, self.cause)
    }
}

/// Final accounting state of a validated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Credits were redeemed.
    Redeemed(RedeemReceipt),
    /// The call cost nothing and [`ZeroCostPolicy::Skip`] is in effect.
    SkippedZeroCost,
    /// A stream was cancelled and partial streams are not billed.
    Cancelled,
    /// Billing failed; the call result was still delivered.
    Unsettled(Unsettled),
}

impl SettlementOutcome {
    /// Returns `true` for [`SettlementOutcome::Redeemed`].
    #[must_use]
    pub const fn is_redeemed(&self) -> bool {
        matches!(self, Self::Redeemed(_))
    }

    /// Credits burned by this call.
    #[must_use]
    pub const fn credits_redeemed(&self) -> u64 {
        match self {
            Self::Redeemed(receipt) => receipt.credits_redeemed,
            _ => 0,
        }
    }
}

/// Redeems credits against the ledger.
#[derive(Clone)]
pub struct SettlementClient {
    ledger: Arc<dyn Ledger>,
    zero_cost: ZeroCostPolicy,
}

impl fmt::Debug for SettlementClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementClient")
            .field("zero_cost", &self.zero_cost)
            .finish_non_exhaustive()
    }
}

impl SettlementClient {
    /// Creates a settlement client.
    pub fn new(ledger: Arc<dyn Ledger>, zero_cost: ZeroCostPolicy) -> Self {
        Self { ledger, zero_cost }
    }

    /// Redeems `request.credits`, retrying once on a transient failure.
    ///
    /// # Errors
    ///
    /// Returns the last [`LedgerError`] when redemption failed, or
    /// [`LedgerError::Declined`] when the ledger answered without burning.
    pub async fn redeem(&self, request: &SettlementRequest) -> Result<RedeemReceipt, LedgerError> {
        let receipt = match self.ledger.redeem_credits(request).await {
            Err(e) if e.is_transient() => {
                tracing::debug!(
                    agent_request_id = %request.agent_request_id,
                    error = %e,
                    "retrying redemption"
                );
                self.ledger.redeem_credits(request).await?
            }
            other => other?,
        };

        if receipt.success {
            Ok(receipt)
        } else {
            Err(LedgerError::Declined)
        }
    }

    /// Settles one call.
    pub async fn settle(&self, request: &SettlementRequest) -> SettlementOutcome {
        if request.credits == 0 && self.zero_cost == ZeroCostPolicy::Skip {
            return SettlementOutcome::SkippedZeroCost;
        }

        match self.redeem(request).await {
            Ok(receipt) => SettlementOutcome::Redeemed(receipt),
            Err(e) => SettlementOutcome::Unsettled(Unsettled {
                agent_request_id: request.agent_request_id.clone(),
                credits: Some(request.credits),
                cause: UnsettledCause::Ledger(e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use mcredit::{InMemoryLedger, StartRequest};

    use super::*;

    async fn open(ledger: &InMemoryLedger) -> SettlementRequest {
        let started = ledger
            .start_processing_request(&StartRequest {
                agent_id: "agent".into(),
                token: "tok".into(),
                endpoint: "mcp://s/tools/t".into(),
                http_verb: "POST".into(),
            })
            .await
            .unwrap();
        SettlementRequest {
            agent_request_id: started.agent_request_id,
            token: "tok".into(),
            credits: 2,
        }
    }

    #[tokio::test]
    async fn retries_once_on_transient_failure() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let request = open(&ledger).await;
        ledger.fail_next_redeems(1);

        let client = SettlementClient::new(ledger.clone(), ZeroCostPolicy::Redeem);
        let outcome = client.settle(&request).await;
        assert_eq!(outcome.credits_redeemed(), 2);
        assert_eq!(ledger.redeem_attempts(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let request = open(&ledger).await;
        ledger.fail_next_redeems(2);

        let client = SettlementClient::new(ledger.clone(), ZeroCostPolicy::Redeem);
        let SettlementOutcome::Unsettled(unsettled) = client.settle(&request).await else {
            panic!("expected unsettled");
        };
        assert_eq!(unsettled.credits, Some(2));
        assert!(matches!(
            unsettled.cause,
            UnsettledCause::Ledger(LedgerError::Unavailable(_))
        ));
        assert_eq!(ledger.redeem_attempts(), 2);
        assert_eq!(ledger.balance("tok"), Some(10));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let client = SettlementClient::new(ledger.clone(), ZeroCostPolicy::Redeem);
        let request = SettlementRequest {
            agent_request_id: "req-unknown".into(),
            token: "tok".into(),
            credits: 1,
        };
        assert!(!client.settle(&request).await.is_redeemed());
        assert_eq!(ledger.redeem_attempts(), 1);
    }

    #[tokio::test]
    async fn zero_cost_policy() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let mut request = open(&ledger).await;
        request.credits = 0;

        let skip = SettlementClient::new(ledger.clone(), ZeroCostPolicy::Skip);
        assert_eq!(skip.settle(&request).await, SettlementOutcome::SkippedZeroCost);
        assert_eq!(ledger.redeem_attempts(), 0);

        let redeem = SettlementClient::new(ledger.clone(), ZeroCostPolicy::Redeem);
        assert!(redeem.settle(&request).await.is_redeemed());
        assert_eq!(ledger.redemptions()[0].credits, 0);
    }
}
