//! Access validation.
//!
//! [`AccessValidator`] is the single authorization checkpoint of a paywalled
//! call: it asks the ledger to open an accounting record for the caller's
//! token and turns the ledger's verdict into an [`AccessDecision`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::InvocationContext;
use crate::error::LedgerError;
use crate::ledger::{Balance, Ledger, StartRequest};

/// Why a call was refused before its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No bearer token was supplied.
    MissingToken,
    /// A token was supplied but the ledger rejected it.
    InvalidToken,
    /// The token is valid but the balance cannot cover the call.
    InsufficientBalance,
    /// The token is valid but holds no subscription to the agent's plan.
    NotSubscribed,
}

impl DenialReason {
    /// Returns the `snake_case` reason code used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientBalance => "insufficient_balance",
            Self::NotSubscribed => "not_subscribed",
        }
    }

    /// Returns `true` when the caller is authenticated but must buy credits.
    #[must_use]
    pub const fn requires_payment(&self) -> bool {
        matches!(self, Self::InsufficientBalance | Self::NotSubscribed)
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated session: the accounting record to settle against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedAccess {
    /// Per-invocation accounting handle.
    pub agent_request_id: String,
    /// The caller's balance at validation time.
    pub balance: Balance,
}

/// Outcome of access validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The call may proceed.
    Granted(GrantedAccess),
    /// The call is refused.
    Denied {
        /// Why the call was refused.
        reason: DenialReason,
    },
}

impl AccessDecision {
    /// Returns `true` for [`AccessDecision::Granted`].
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Asks the ledger whether a caller may invoke a handler.
#[derive(Clone)]
pub struct AccessValidator {
    ledger: Arc<dyn Ledger>,
    agent_id: String,
}

impl fmt::Debug for AccessValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessValidator")
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

impl AccessValidator {
    /// Creates a validator for the given agent.
    pub fn new(ledger: Arc<dyn Ledger>, agent_id: impl Into<String>) -> Self {
        Self {
            ledger,
            agent_id: agent_id.into(),
        }
    }

    /// The agent this validator meters calls for.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Validates one invocation.
    ///
    /// Issues exactly one `start_processing_request`; nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the ledger fails rather than rejects
    /// (outage, malformed answer, hook abort). Rejections of the caller are
    /// reported as [`AccessDecision::Denied`].
    pub async fn validate(
        &self,
        ctx: &InvocationContext,
        logical_resource_id: &str,
        http_verb: &str,
    ) -> Result<AccessDecision, LedgerError> {
        let request = StartRequest {
            agent_id: self.agent_id.clone(),
            token: ctx.token().to_owned(),
            endpoint: logical_resource_id.to_owned(),
            http_verb: http_verb.to_owned(),
        };

        let started = match self.ledger.start_processing_request(&request).await {
            Ok(started) => started,
            Err(LedgerError::InvalidToken(_)) => {
                return Ok(AccessDecision::Denied {
                    reason: DenialReason::InvalidToken,
                });
            }
            Err(LedgerError::NotSubscribed) => {
                return Ok(AccessDecision::Denied {
                    reason: DenialReason::NotSubscribed,
                });
            }
            Err(LedgerError::InsufficientBalance) => {
                return Ok(AccessDecision::Denied {
                    reason: DenialReason::InsufficientBalance,
                });
            }
            Err(err) => return Err(err),
        };

        if !started.balance.is_subscriber {
            return Ok(AccessDecision::Denied {
                reason: DenialReason::NotSubscribed,
            });
        }

        Ok(AccessDecision::Granted(GrantedAccess {
            agent_request_id: started.agent_request_id,
            balance: started.balance,
        }))
    }
}
