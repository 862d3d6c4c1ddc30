//! In-process [`Ledger`] implementation.
//!
//! [`InMemoryLedger`] keeps accounts keyed by bearer token. It backs the demo
//! server's local mode and doubles as the recording ledger in tests (see
//! [`InMemoryLedger::with_recording`]), with switches to simulate outages.
//!
//! Accounting records that are opened but never redeemed expire after
//! [`DEFAULT_REQUEST_TTL`]; at most [`DEFAULT_MAX_OPEN_REQUESTS`] may be open
//! at once.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::LedgerError;
use crate::ledger::{
    AccessToken, Balance, BoxFuture, Ledger, RedeemReceipt, SettlementRequest, StartRequest,
    StartedRequest,
};

/// How long an unredeemed accounting record stays open.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(15 * 60);

/// Upper bound on simultaneously open accounting records.
pub const DEFAULT_MAX_OPEN_REQUESTS: usize = 10_000;

#[derive(Debug, Clone)]
struct Account {
    subscriber: bool,
    balance: u64,
}

#[derive(Debug)]
struct OpenRequest {
    token: String,
    opened_at: Instant,
}

/// A ledger held entirely in memory.
#[derive(Debug)]
pub struct InMemoryLedger {
    accounts: DashMap<String, Account>,
    /// Open accounting records keyed by agent request id.
    open_requests: DashMap<String, OpenRequest>,
    /// Plan id -> access token handed out by `get_access_token`.
    plan_tokens: DashMap<String, String>,
    request_ttl: Duration,
    max_open_requests: usize,
    recording: bool,
    starts: Mutex<Vec<StartRequest>>,
    redemptions: Mutex<Vec<SettlementRequest>>,
    redeem_attempts: AtomicU64,
    next_request: AtomicU64,
    unavailable: AtomicBool,
    failing_redeems: AtomicU32,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self {
            accounts: DashMap::new(),
            open_requests: DashMap::new(),
            plan_tokens: DashMap::new(),
            request_ttl: DEFAULT_REQUEST_TTL,
            max_open_requests: DEFAULT_MAX_OPEN_REQUESTS,
            recording: false,
            starts: Mutex::default(),
            redemptions: Mutex::default(),
            redeem_attempts: AtomicU64::new(0),
            next_request: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
            failing_redeems: AtomicU32::new(0),
        }
    }
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps every start and successful redemption for inspection through
    /// [`start_calls`](Self::start_calls) and
    /// [`redemptions`](Self::redemptions). Off by default.
    #[must_use]
    pub const fn with_recording(mut self) -> Self {
        self.recording = true;
        self
    }

    /// Sets how long an unredeemed record stays open.
    #[must_use]
    pub const fn with_request_ttl(mut self, ttl: Duration) -> Self {
        self.request_ttl = ttl;
        self
    }

    /// Caps the number of simultaneously open records. Starts beyond the cap
    /// fail as unavailable.
    #[must_use]
    pub const fn with_max_open_requests(mut self, max: usize) -> Self {
        self.max_open_requests = max;
        self
    }

    /// Adds a subscribed account holding `balance` credits.
    #[must_use]
    pub fn with_account(self, token: impl Into<String>, balance: u64) -> Self {
        self.accounts.insert(
            token.into(),
            Account {
                subscriber: true,
                balance,
            },
        );
        self
    }

    /// Adds an account that exists but holds no subscription.
    #[must_use]
    pub fn with_unsubscribed_account(self, token: impl Into<String>) -> Self {
        self.accounts.insert(
            token.into(),
            Account {
                subscriber: false,
                balance: 0,
            },
        );
        self
    }

    /// Makes `get_access_token` hand out `token` for `plan_id`.
    #[must_use]
    pub fn with_plan_token(self, plan_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.plan_tokens.insert(plan_id.into(), token.into());
        self
    }

    /// Simulates a full ledger outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` redemptions fail as unavailable.
    pub fn fail_next_redeems(&self, count: u32) {
        self.failing_redeems.store(count, Ordering::SeqCst);
    }

    /// Current balance of an account.
    #[must_use]
    pub fn balance(&self, token: &str) -> Option<u64> {
        self.accounts.get(token).map(|a| a.balance)
    }

    /// Every `start_processing_request` received, in order. Empty unless
    /// recording is enabled.
    #[must_use]
    pub fn start_calls(&self) -> Vec<StartRequest> {
        self.starts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every successful redemption, in order. Empty unless recording is
    /// enabled.
    #[must_use]
    pub fn redemptions(&self) -> Vec<SettlementRequest> {
        self.redemptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of redemption attempts, including failed ones.
    #[must_use]
    pub fn redeem_attempts(&self) -> u64 {
        self.redeem_attempts.load(Ordering::SeqCst)
    }

    /// Number of accounting records opened but not yet redeemed.
    #[must_use]
    pub fn open_requests(&self) -> usize {
        self.open_requests.len()
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".to_owned()));
        }
        Ok(())
    }

    fn expire_open_requests(&self) {
        let ttl = self.request_ttl;
        self.open_requests
            .retain(|_, open| open.opened_at.elapsed() < ttl);
    }

    fn start(&self, request: &StartRequest) -> Result<StartedRequest, LedgerError> {
        if self.recording {
            self.starts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
        }
        self.check_available()?;

        let account = self
            .accounts
            .get(&request.token)
            .map(|a| a.clone())
            .ok_or_else(|| LedgerError::InvalidToken("unknown token".to_owned()))?;
        if account.subscriber && account.balance == 0 {
            return Err(LedgerError::InsufficientBalance);
        }

        self.expire_open_requests();
        if self.open_requests.len() >= self.max_open_requests {
            tracing::warn!(
                open = self.open_requests.len(),
                "too many open requests, refusing start"
            );
            return Err(LedgerError::Unavailable("too many open requests".to_owned()));
        }

        let n = self.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let agent_request_id = format!("req-{n}");
        self.open_requests.insert(
            agent_request_id.clone(),
            OpenRequest {
                token: request.token.clone(),
                opened_at: Instant::now(),
            },
        );

        Ok(StartedRequest {
            agent_request_id,
            balance: Balance {
                is_subscriber: account.subscriber,
                balance: account.balance,
                plan_id: None,
            },
        })
    }

    fn redeem(&self, request: &SettlementRequest) -> Result<RedeemReceipt, LedgerError> {
        self.redeem_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let injected = self
            .failing_redeems
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(LedgerError::Unavailable("injected redeem failure".to_owned()));
        }

        let Some((id, open)) = self.open_requests.remove(&request.agent_request_id) else {
            return Err(LedgerError::UnknownRequest(request.agent_request_id.clone()));
        };
        if open.opened_at.elapsed() >= self.request_ttl {
            return Err(LedgerError::UnknownRequest(id));
        }
        if open.token != request.token {
            self.open_requests.insert(id, open);
            return Err(LedgerError::InvalidToken(
                "token does not own this request".to_owned(),
            ));
        }

        // The receipt reports what was actually burned, never more than the balance.
        let credits_redeemed = self
            .accounts
            .get_mut(&open.token)
            .map_or(0, |mut account| {
                let burned = account.balance.min(request.credits);
                account.balance -= burned;
                burned
            });
        if self.recording {
            self.redemptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
        }

        Ok(RedeemReceipt {
            success: true,
            credits_redeemed,
            tx_hash: None,
        })
    }
}

impl Ledger for InMemoryLedger {
    fn get_access_token<'a>(
        &'a self,
        plan_id: &'a str,
        _agent_id: &'a str,
    ) -> BoxFuture<'a, Result<AccessToken, LedgerError>> {
        Box::pin(async move {
            self.check_available()?;
            self.plan_tokens
                .get(plan_id)
                .map(|t| AccessToken {
                    access_token: t.clone(),
                })
                .ok_or(LedgerError::NotSubscribed)
        })
    }

    fn start_processing_request<'a>(
        &'a self,
        request: &'a StartRequest,
    ) -> BoxFuture<'a, Result<StartedRequest, LedgerError>> {
        Box::pin(async move { self.start(request) })
    }

    fn redeem_credits<'a>(
        &'a self,
        request: &'a SettlementRequest,
    ) -> BoxFuture<'a, Result<RedeemReceipt, LedgerError>> {
        Box::pin(async move { self.redeem(request) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_request(token: &str) -> StartRequest {
        StartRequest {
            agent_id: "agent".into(),
            token: token.into(),
            endpoint: "mcp://s/tools/t".into(),
            http_verb: "POST".into(),
        }
    }

    fn settlement(started: &StartedRequest, credits: u64) -> SettlementRequest {
        SettlementRequest {
            agent_request_id: started.agent_request_id.clone(),
            token: "tok".into(),
            credits,
        }
    }

    #[tokio::test]
    async fn start_then_redeem_burns_credits_once() {
        let ledger = InMemoryLedger::new().with_recording().with_account("tok", 5);
        let started = ledger
            .start_processing_request(&start_request("tok"))
            .await
            .unwrap();
        assert_eq!(ledger.open_requests(), 1);

        let settle = SettlementRequest {
            agent_request_id: started.agent_request_id.clone(),
            token: "tok".into(),
            credits: 2,
        };
        let receipt = ledger.redeem_credits(&settle).await.unwrap();
        assert_eq!(receipt.credits_redeemed, 2);
        assert_eq!(ledger.balance("tok"), Some(3));
        assert_eq!(ledger.open_requests(), 0);

        let again = ledger.redeem_credits(&settle).await.unwrap_err();
        assert!(matches!(again, LedgerError::UnknownRequest(_)));
        assert_eq!(ledger.redemptions().len(), 1);
    }

    #[tokio::test]
    async fn request_ids_are_never_reused() {
        let ledger = InMemoryLedger::new().with_account("tok", 5);
        let a = ledger
            .start_processing_request(&start_request("tok"))
            .await
            .unwrap();
        let b = ledger
            .start_processing_request(&start_request("tok"))
            .await
            .unwrap();
        assert_ne!(a.agent_request_id, b.agent_request_id);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let ledger = InMemoryLedger::new().with_account("tok", 5);
        let started = ledger
            .start_processing_request(&start_request("tok"))
            .await
            .unwrap();
        ledger.fail_next_redeems(1);
        let settle = SettlementRequest {
            agent_request_id: started.agent_request_id,
            token: "tok".into(),
            credits: 1,
        };
        assert!(ledger.redeem_credits(&settle).await.unwrap_err().is_transient());
        assert!(ledger.redeem_credits(&settle).await.is_ok());
        assert_eq!(ledger.redeem_attempts(), 2);
    }

    #[tokio::test]
    async fn access_tokens_come_from_plans() {
        let ledger = InMemoryLedger::new().with_plan_token("plan-1", "tok");
        let token = ledger.get_access_token("plan-1", "agent").await.unwrap();
        assert_eq!(token.access_token, "tok");
        assert_eq!(
            ledger.get_access_token("plan-2", "agent").await.unwrap_err(),
            LedgerError::NotSubscribed
        );
    }

    #[tokio::test]
    async fn receipt_reports_only_the_credits_burned() {
        let ledger = InMemoryLedger::new().with_account("tok", 1);
        let started = ledger
            .start_processing_request(&start_request("tok"))
            .await
            .unwrap();
        let receipt = ledger
            .redeem_credits(&settlement(&started, 2))
            .await
            .unwrap();
        assert_eq!(receipt.credits_redeemed, 1);
        assert_eq!(ledger.balance("tok"), Some(0));
    }

    #[tokio::test]
    async fn recording_is_off_by_default() {
        let ledger = InMemoryLedger::new().with_account("tok", 5);
        let started = ledger
            .start_processing_request(&start_request("tok"))
            .await
            .unwrap();
        ledger
            .redeem_credits(&settlement(&started, 1))
            .await
            .unwrap();
        assert!(ledger.start_calls().is_empty());
        assert!(ledger.redemptions().is_empty());
    }

    #[tokio::test]
    async fn unredeemed_records_expire() {
        let ledger = InMemoryLedger::new()
            .with_account("tok", 5)
            .with_request_ttl(Duration::ZERO);
        let mut last = None;
        for _ in 0..1000 {
            last = Some(
                ledger
                    .start_processing_request(&start_request("tok"))
                    .await
                    .unwrap(),
            );
        }
        assert!(ledger.open_requests() <= 1);

        let err = ledger
            .redeem_credits(&settlement(&last.unwrap(), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownRequest(_)));
        assert_eq!(ledger.balance("tok"), Some(5));
    }

    #[tokio::test]
    async fn open_records_are_capped() {
        let ledger = InMemoryLedger::new()
            .with_account("tok", 5)
            .with_max_open_requests(2);
        for _ in 0..2 {
            ledger
                .start_processing_request(&start_request("tok"))
                .await
                .unwrap();
        }
        let err = ledger
            .start_processing_request(&start_request("tok"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ledger.open_requests(), 2);
    }
}
