//! Error types shared across the workspace.
//!
//! Each failure source gets its own enum so that callers can tell a missing
//! token apart from a rejected one, and a billing fault apart from a ledger
//! outage.

/// Failure to build an [`InvocationContext`](crate::InvocationContext).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ContextError {
    /// No usable `Authorization` header was supplied.
    #[error("No authorization header")]
    NoAuthorizationHeader,
}

/// A cost function could not produce a credit amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CostError {
    /// The cost function failed with the given message.
    #[error("Cost function failed: {0}")]
    Function(String),
    /// The handler result could not be converted to JSON for costing.
    #[error("Result is not representable as JSON: {0}")]
    Serialization(String),
}

impl CostError {
    /// Creates a cost function failure.
    #[must_use]
    pub fn function(message: impl Into<String>) -> Self {
        Self::Function(message.into())
    }
}

impl From<serde_json::Error> for CostError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Errors reported by a [`Ledger`](crate::Ledger) implementation.
///
/// The first three variants are ledger verdicts about the caller; the rest
/// are faults of the ledger or of the exchange with it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The ledger does not recognise the token.
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    /// The caller holds no subscription for the agent.
    #[error("Not subscribed")]
    NotSubscribed,
    /// The caller's balance cannot cover the request.
    #[error("Insufficient balance")]
    InsufficientBalance,
    /// The agent request id is unknown or already closed.
    #[error("Unknown agent request: {0}")]
    UnknownRequest(String),
    /// The ledger could not be reached or failed to answer.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
    /// The ledger answered with something that could not be understood.
    #[error("Malformed ledger response: {0}")]
    Malformed(String),
    /// The ledger answered but refused to burn the credits.
    #[error("Redemption declined")]
    Declined,
    /// A hook aborted the operation.
    #[error("{reason}: {message}")]
    Aborted {
        /// Machine-readable abort reason.
        reason: String,
        /// Human-readable abort message.
        message: String,
    },
}

impl LedgerError {
    /// Returns `true` for transient failures that may succeed when retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A handler descriptor is inconsistent with the paywall configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid descriptor for {name}: {reason}")]
pub struct DescriptorError {
    /// The descriptor name.
    pub name: String,
    /// Why the descriptor was rejected.
    pub reason: String,
}

impl DescriptorError {
    /// Creates a descriptor error.
    #[must_use]
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
