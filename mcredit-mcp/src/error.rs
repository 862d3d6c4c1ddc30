//! Paywall errors and their JSON-RPC mapping.
//!
//! [`PaywallError`] is what a wrapped call returns instead of the handler's
//! value. [`PaywallError::to_jsonrpc_error`] turns it into the wire error:
//! refusals become `-32003`, every internal fault becomes a generic `-32002`
//! whose message never carries internal error text.

use std::fmt;

use mcredit::jsonrpc::{AUTHORIZATION_REQUIRED, SERVER_ERROR};
use mcredit::{
    ContextError, DenialReason, DescriptorError, ErrorReason, JsonRpcError, LedgerError,
};
use serde_json::{Map, Value, json};

use crate::types::HandlerError;

const AUTHORIZATION_REQUIRED_MESSAGE: &str = "Authorization required";
const PAYMENT_REQUIRED_MESSAGE: &str = "Payment required";
const SERVER_ERROR_MESSAGE: &str = "Internal server error";

/// A refused call, with the plans the caller may buy to get access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Why the call was refused.
    pub reason: DenialReason,
    /// Suggested plan ids, reported for payment denials.
    pub plans: Vec<String>,
}

impl Denial {
    /// A denial without plan suggestions.
    #[must_use]
    pub const fn new(reason: DenialReason) -> Self {
        Self {
            reason,
            plans: Vec::new(),
        }
    }

    /// Attaches plan suggestions.
    #[must_use]
    pub fn with_plans(mut self, plans: Vec<String>) -> Self {
        self.plans = plans;
        self
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "access denied: {}", self.reason)
    }
}

/// Errors returned by a paywalled call.
#[derive(Debug, thiserror::Error)]
pub enum PaywallError {
    /// The caller was refused.
    #[error("{0}")]
    Denied(Denial),
    /// The handler failed; passed through unchanged.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// The ledger failed while the call was being admitted or pre-charged.
    #[error("Ledger failure: {0}")]
    Ledger(#[from] LedgerError),
    /// The handler was registered with an unusable descriptor.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl From<ContextError> for PaywallError {
    fn from(_: ContextError) -> Self {
        Self::Denied(Denial::new(DenialReason::MissingToken))
    }
}

impl PaywallError {
    /// The stable reason code for this error.
    #[must_use]
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::Denied(denial) => denial.reason.into(),
            Self::Handler(_) => ErrorReason::HandlerError,
            Self::Ledger(e) if e.is_transient() => ErrorReason::LedgerUnavailable,
            Self::Ledger(_) => ErrorReason::LedgerError,
            Self::Descriptor(_) => ErrorReason::InvalidDescriptor,
        }
    }

    /// Returns the denial, if the call was refused.
    #[must_use]
    pub const fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Denied(denial) => Some(denial),
            _ => None,
        }
    }

    /// Maps the error to its JSON-RPC representation.
    #[must_use]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        let mut data = Map::new();
        data.insert("reason".to_owned(), json!(self.reason()));

        let (code, message) = match self {
            Self::Denied(denial) if denial.reason.requires_payment() => {
                if !denial.plans.is_empty() {
                    data.insert("plans".to_owned(), json!(denial.plans));
                }
                (AUTHORIZATION_REQUIRED, PAYMENT_REQUIRED_MESSAGE.to_owned())
            }
            Self::Denied(_) => (
                AUTHORIZATION_REQUIRED,
                AUTHORIZATION_REQUIRED_MESSAGE.to_owned(),
            ),
            Self::Handler(e) => (SERVER_ERROR, e.message().to_owned()),
            Self::Ledger(_) | Self::Descriptor(_) => (SERVER_ERROR, SERVER_ERROR_MESSAGE.to_owned()),
        };

        JsonRpcError::new(code, message).with_data(Value::Object(data))
    }
}
