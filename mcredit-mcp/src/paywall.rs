//! The invocation wrapper.
//!
//! [`Paywall`] turns a plain handler into a [`Paywalled`] one. Each call goes
//! through the same sequence of states:
//!
//! 1. **Resolving** - find the caller's bearer token ([`ContextResolver`])
//! 2. **Validating** - open an accounting record ([`AccessValidator`])
//! 3. **Executing** - run the handler
//! 4. **Costing** - resolve the [`CostSpec`](mcredit::CostSpec)
//! 5. **Settling** - redeem credits ([`SettlementClient`])
//!
//! A denial or ledger failure before execution ends the call with a
//! [`PaywallError`]. A handler failure is returned unchanged and nothing is
//! billed. Once the handler has produced a value that value is returned no
//! matter how costing or settlement turn out; billing faults are reported
//! through [`PaywallHooks`] and logged.
//!
//! With [`PaywallConfig::settle_before_execution`] credits are redeemed
//! between validation and execution instead, and are not refunded if the
//! handler then fails.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use mcredit::descriptor::DEFAULT_HTTP_VERB;
use mcredit::{
    AccessDecision, AccessValidator, AuthHeaders, CostError, CostResolver, DenialReason,
    DescriptorError, GrantedAccess, InvocationContext, InvocationDescriptor, Ledger,
    PostCallContext, PreCallContext, SettlementRequest,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Denial, PaywallError};
use crate::hooks::{CallInfo, NoPaywallHooks, PaywallHooks};
use crate::resolver::ContextResolver;
use crate::settlement::{
    SettlementClient, SettlementOutcome, Unsettled, UnsettledCause, ZeroCostPolicy,
};
use crate::types::{HandlerError, Invocation};

/// Paywall-wide settings.
#[derive(Debug, Clone)]
pub struct PaywallConfig {
    /// The agent whose plan callers consume.
    pub agent_id: String,
    /// Server name used in logical resource ids.
    pub server_name: String,
    /// HTTP verb reported to the ledger.
    pub http_verb: String,
    /// Whether zero-cost calls still hit the ledger.
    pub zero_cost: ZeroCostPolicy,
    /// Redeem before running the handler instead of after.
    pub settle_before_execution: bool,
    /// Plan ids suggested to callers refused for payment reasons.
    pub plans: Vec<String>,
}

impl PaywallConfig {
    /// Creates a configuration with default policies.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            server_name: server_name.into(),
            http_verb: DEFAULT_HTTP_VERB.to_owned(),
            zero_cost: ZeroCostPolicy::default(),
            settle_before_execution: false,
            plans: Vec::new(),
        }
    }

    /// Sets the zero-cost policy.
    #[must_use]
    pub const fn with_zero_cost(mut self, policy: ZeroCostPolicy) -> Self {
        self.zero_cost = policy;
        self
    }

    /// Enables charge-before-execute.
    #[must_use]
    pub const fn with_settle_before_execution(mut self, enabled: bool) -> Self {
        self.settle_before_execution = enabled;
        self
    }

    /// Sets the suggested plans.
    #[must_use]
    pub fn with_plans(mut self, plans: Vec<String>) -> Self {
        self.plans = plans;
        self
    }
}

/// A call that passed validation.
pub(crate) struct Admitted {
    pub(crate) ctx: InvocationContext,
    pub(crate) logical_resource_id: String,
    pub(crate) granted: GrantedAccess,
    /// Set when credits were already taken before execution.
    pub(crate) prepaid: Option<SettlementOutcome>,
}

impl Admitted {
    pub(crate) fn settlement_request(&self, credits: u64) -> SettlementRequest {
        SettlementRequest {
            agent_request_id: self.granted.agent_request_id.clone(),
            token: self.ctx.token().to_owned(),
            credits,
        }
    }
}

/// Wraps handlers with credit validation and settlement.
#[derive(Clone)]
pub struct Paywall {
    config: Arc<PaywallConfig>,
    resolver: ContextResolver,
    validator: AccessValidator,
    settlement: SettlementClient,
    hooks: Arc<dyn PaywallHooks>,
}

impl fmt::Debug for Paywall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paywall")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Paywall {
    /// Creates a paywall in explicit context mode.
    pub fn new(ledger: Arc<dyn Ledger>, config: PaywallConfig) -> Self {
        Self {
            validator: AccessValidator::new(Arc::clone(&ledger), config.agent_id.clone()),
            settlement: SettlementClient::new(ledger, config.zero_cost),
            config: Arc::new(config),
            resolver: ContextResolver::explicit(),
            hooks: Arc::new(NoPaywallHooks),
        }
    }

    /// Replaces the context resolver (e.g. to enable ambient mode).
    #[must_use]
    pub fn with_resolver(mut self, resolver: ContextResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Installs observability hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl PaywallHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PaywallConfig {
        &self.config
    }

    /// Wraps a handler.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when charge-before-execute is enabled and
    /// the descriptor's cost is only known after the handler runs.
    pub fn wrap<H>(
        &self,
        handler: H,
        descriptor: InvocationDescriptor,
    ) -> Result<Paywalled<H>, DescriptorError> {
        self.check_descriptor(&descriptor)?;
        Ok(Paywalled {
            paywall: self.clone(),
            descriptor: Arc::new(descriptor),
            handler,
        })
    }

    pub(crate) fn check_descriptor(
        &self,
        descriptor: &InvocationDescriptor,
    ) -> Result<(), DescriptorError> {
        if self.config.settle_before_execution && !descriptor.cost.is_known_before_execution() {
            return Err(DescriptorError::new(
                descriptor.name.clone(),
                "post-call costs cannot be charged before execution",
            ));
        }
        Ok(())
    }

    /// Resolves, validates and, under charge-before-execute, pre-charges.
    pub(crate) async fn admit(
        &self,
        descriptor: &InvocationDescriptor,
        invocation: &Invocation,
        headers: Option<AuthHeaders>,
    ) -> Result<Admitted, PaywallError> {
        let logical_resource_id = descriptor.logical_resource_id(&self.config.server_name);

        let ctx = match self.resolver.resolve(headers, descriptor.kind) {
            Ok(ctx) => ctx,
            Err(e) => {
                let denial = Denial::new(DenialReason::MissingToken);
                tracing::debug!(name = %descriptor.name, error = %e, "no bearer token");
                return Err(self.deny(descriptor, &logical_resource_id, denial).await);
            }
        };

        let decision = self
            .validator
            .validate(&ctx, &logical_resource_id, &self.config.http_verb)
            .await
            .map_err(|e| {
                tracing::error!(name = %descriptor.name, error = %e, "access validation failed");
                PaywallError::Ledger(e)
            })?;

        let granted = match decision {
            AccessDecision::Granted(granted) => granted,
            AccessDecision::Denied { reason } => {
                let mut denial = Denial::new(reason);
                if reason.requires_payment() {
                    denial = denial.with_plans(self.config.plans.clone());
                }
                tracing::debug!(name = %descriptor.name, %reason, "access denied");
                return Err(self.deny(descriptor, &logical_resource_id, denial).await);
            }
        };

        let mut admitted = Admitted {
            ctx,
            logical_resource_id,
            granted,
            prepaid: None,
        };

        if self.config.settle_before_execution {
            admitted.prepaid = Some(self.prepay(descriptor, invocation, &admitted).await?);
        }

        Ok(admitted)
    }

    async fn deny(
        &self,
        descriptor: &InvocationDescriptor,
        logical_resource_id: &str,
        denial: Denial,
    ) -> PaywallError {
        let call = CallInfo {
            descriptor,
            logical_resource_id,
        };
        self.hooks.on_denied(call, &denial).await;
        PaywallError::Denied(denial)
    }

    async fn prepay(
        &self,
        descriptor: &InvocationDescriptor,
        invocation: &Invocation,
        admitted: &Admitted,
    ) -> Result<SettlementOutcome, PaywallError> {
        let pre = PreCallContext {
            arguments: &invocation.arguments,
            context: &admitted.ctx,
        };
        let Some(cost) = CostResolver::resolve_before_execution(&descriptor.cost, &pre) else {
            return Err(DescriptorError::new(
                descriptor.name.clone(),
                "post-call costs cannot be charged before execution",
            )
            .into());
        };

        let credits = match cost {
            Ok(credits) => credits,
            Err(e) => {
                let outcome = SettlementOutcome::Unsettled(Unsettled {
                    agent_request_id: admitted.granted.agent_request_id.clone(),
                    credits: None,
                    cause: UnsettledCause::Cost(e),
                });
                self.report(descriptor, admitted, &outcome).await;
                return Ok(outcome);
            }
        };

        let outcome = self.settlement.settle(&admitted.settlement_request(credits)).await;
        if let SettlementOutcome::Unsettled(Unsettled {
            cause: UnsettledCause::Ledger(e),
            ..
        }) = outcome
        {
            tracing::error!(
                name = %descriptor.name,
                agent_request_id = %admitted.granted.agent_request_id,
                error = %e,
                "pre-charge failed"
            );
            return Err(PaywallError::Ledger(e));
        }
        self.report(descriptor, admitted, &outcome).await;
        Ok(outcome)
    }

    /// Resolves the cost of a completed call and settles it.
    ///
    /// `result` is evaluated lazily, only for post-call costs.
    pub(crate) async fn finish(
        &self,
        descriptor: &InvocationDescriptor,
        invocation: &Invocation,
        admitted: Admitted,
        result: impl FnOnce() -> Result<Value, CostError>,
        chunks: Option<usize>,
    ) -> SettlementOutcome {
        if let Some(prepaid) = admitted.prepaid {
            return prepaid;
        }

        let pre = PreCallContext {
            arguments: &invocation.arguments,
            context: &admitted.ctx,
        };
        let cost = if descriptor.cost.is_known_before_execution() {
            CostResolver::resolve(&descriptor.cost, &pre, None)
        } else {
            result().and_then(|value| {
                let post = PostCallContext {
                    arguments: &invocation.arguments,
                    result: &value,
                    chunks,
                    context: &admitted.ctx,
                };
                CostResolver::resolve(&descriptor.cost, &pre, Some(&post))
            })
        };

        let outcome = match cost {
            Ok(credits) => {
                self.settlement
                    .settle(&admitted.settlement_request(credits))
                    .await
            }
            Err(e) => SettlementOutcome::Unsettled(Unsettled {
                agent_request_id: admitted.granted.agent_request_id.clone(),
                credits: None,
                cause: UnsettledCause::Cost(e),
            }),
        };

        self.report(descriptor, &admitted, &outcome).await;
        outcome
    }

    async fn report(
        &self,
        descriptor: &InvocationDescriptor,
        admitted: &Admitted,
        outcome: &SettlementOutcome,
    ) {
        let call = CallInfo {
            descriptor,
            logical_resource_id: &admitted.logical_resource_id,
        };
        match outcome {
            SettlementOutcome::Redeemed(receipt) => {
                let request = admitted.settlement_request(receipt.credits_redeemed);
                tracing::debug!(
                    name = %descriptor.name,
                    agent_request_id = %request.agent_request_id,
                    credits = receipt.credits_redeemed,
                    "credits redeemed"
                );
                self.hooks.after_settle(call, &request, receipt).await;
            }
            SettlementOutcome::Unsettled(unsettled) => {
                tracing::warn!(
                    name = %descriptor.name,
                    agent_request_id = %unsettled.agent_request_id,
                    credits = ?unsettled.credits,
                    cause = %unsettled.cause,
                    "call left unsettled"
                );
                self.hooks.on_unsettled(call, unsettled).await;
            }
            SettlementOutcome::SkippedZeroCost | SettlementOutcome::Cancelled => {}
        }
    }
}

/// A handler's value together with how the call was billed.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled<O> {
    /// The handler's value, unchanged.
    pub value: O,
    /// Accounting result.
    pub outcome: SettlementOutcome,
}

/// A handler guarded by a [`Paywall`].
pub struct Paywalled<H> {
    paywall: Paywall,
    descriptor: Arc<InvocationDescriptor>,
    handler: H,
}

impl<H> fmt::Debug for Paywalled<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paywalled")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<H> Paywalled<H> {
    /// The descriptor this handler is metered under.
    #[must_use]
    pub fn descriptor(&self) -> &InvocationDescriptor {
        &self.descriptor
    }

    /// Runs the call and returns the handler's value.
    ///
    /// `headers` are the raw request headers in explicit mode, or `None` to
    /// use the ambient accessor.
    ///
    /// # Errors
    ///
    /// See [`Paywalled::call_with_outcome`].
    pub async fn call<Fut, O>(
        &self,
        invocation: Invocation,
        headers: Option<AuthHeaders>,
    ) -> Result<O, PaywallError>
    where
        H: Fn(Invocation, InvocationContext) -> Fut,
        Fut: Future<Output = Result<O, HandlerError>>,
        O: Serialize,
    {
        self.call_with_outcome(invocation, headers)
            .await
            .map(|settled| settled.value)
    }

    /// Runs the call and also reports the settlement outcome.
    ///
    /// # Errors
    ///
    /// - [`PaywallError::Denied`] when the caller has no usable token, or
    ///   the ledger refuses it
    /// - [`PaywallError::Ledger`] when the ledger fails during validation or
    ///   pre-charge
    /// - [`PaywallError::Handler`] when the handler fails
    pub async fn call_with_outcome<Fut, O>(
        &self,
        invocation: Invocation,
        headers: Option<AuthHeaders>,
    ) -> Result<Settled<O>, PaywallError>
    where
        H: Fn(Invocation, InvocationContext) -> Fut,
        Fut: Future<Output = Result<O, HandlerError>>,
        O: Serialize,
    {
        let descriptor = &*self.descriptor;
        let admitted = self.paywall.admit(descriptor, &invocation, headers).await?;

        let value = (self.handler)(invocation.clone(), admitted.ctx.clone())
            .await
            .map_err(|e| {
                tracing::debug!(
                    name = %descriptor.name,
                    agent_request_id = %admitted.granted.agent_request_id,
                    error = %e,
                    "handler failed, not billing"
                );
                PaywallError::Handler(e)
            })?;

        let outcome = self
            .paywall
            .finish(
                descriptor,
                &invocation,
                admitted,
                || serde_json::to_value(&value).map_err(CostError::from),
                None,
            )
            .await;

        Ok(Settled { value, outcome })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mcredit::{BoxFuture, CostSpec, InMemoryLedger, LedgerError, RedeemReceipt};
    use serde_json::json;

    use super::*;
    use crate::types::CallToolResult;

    fn invocation(value: Value) -> Invocation {
        Invocation::new(value.as_object().cloned().unwrap_or_default())
    }

    fn paywall(ledger: &Arc<InMemoryLedger>) -> Paywall {
        Paywall::new(ledger.clone(), PaywallConfig::new("agent-1", "weather-mcp"))
    }

    async fn echo(inv: Invocation, _ctx: InvocationContext) -> Result<String, HandlerError> {
        Ok(format!("hello {}", inv.argument_str("city").unwrap_or("?")))
    }

    #[derive(Default)]
    struct Recorder {
        denied: Mutex<Vec<DenialReason>>,
        settled: AtomicUsize,
        unsettled: Mutex<Vec<Unsettled>>,
    }

    impl PaywallHooks for Arc<Recorder> {
        fn on_denied<'a>(&'a self, _call: CallInfo<'a>, denial: &'a Denial) -> BoxFuture<'a, ()> {
            Box::pin(async move { self.denied.lock().unwrap().push(denial.reason) })
        }

        fn after_settle<'a>(
            &'a self,
            _call: CallInfo<'a>,
            _request: &'a SettlementRequest,
            _receipt: &'a RedeemReceipt,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.settled.fetch_add(1, Ordering::SeqCst);
            })
        }

        fn on_unsettled<'a>(
            &'a self,
            _call: CallInfo<'a>,
            unsettled: &'a Unsettled,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move { self.unsettled.lock().unwrap().push(unsettled.clone()) })
        }
    }

    #[tokio::test]
    async fn happy_path_validates_once_and_redeems_once() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let tool = paywall(&ledger)
            .wrap(echo, InvocationDescriptor::tool("weather.today", CostSpec::Constant(1)))
            .unwrap();

        let settled = tool
            .call_with_outcome(
                invocation(json!({"city": "Madrid"})),
                Some(AuthHeaders::bearer("tok")),
            )
            .await
            .unwrap();
        assert_eq!(settled.value, "hello Madrid");
        assert_eq!(settled.outcome.credits_redeemed(), 1);

        let starts = ledger.start_calls();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].endpoint, "mcp://weather-mcp/tools/weather.today");
        assert_eq!(starts[0].http_verb, "POST");
        let redemptions = ledger.redemptions();
        assert_eq!(redemptions.len(), 1);
        assert_eq!(redemptions[0].agent_request_id, "req-1");
        assert_eq!(redemptions[0].credits, 1);
        assert_eq!(ledger.balance("tok"), Some(9));
    }

    #[tokio::test]
    async fn missing_token_never_reaches_the_ledger() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let tool = paywall(&ledger)
            .wrap(
                move |_inv: Invocation, _ctx: InvocationContext| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, HandlerError>("ran") }
                },
                InvocationDescriptor::tool("t", CostSpec::Constant(1)),
            )
            .unwrap();

        for headers in [None, Some(AuthHeaders::new())] {
            let err = tool.call(Invocation::default(), headers).await.unwrap_err();
            assert_eq!(err.to_jsonrpc_error().code, -32003);
            assert_eq!(err.denial().map(|d| d.reason), Some(DenialReason::MissingToken));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(ledger.start_calls().is_empty());
        assert!(ledger.redemptions().is_empty());
    }

    #[tokio::test]
    async fn denials_skip_the_handler() {
        let ledger = Arc::new(
            InMemoryLedger::new()
                .with_recording()
                .with_account("broke", 0)
                .with_unsubscribed_account("lapsed"),
        );
        let recorder = Arc::new(Recorder::default());
        let pw = Paywall::new(
            ledger.clone(),
            PaywallConfig::new("agent-1", "s").with_plans(vec!["plan-basic".into()]),
        )
        .with_hooks(Arc::clone(&recorder));
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let tool = pw
            .wrap(
                move |inv: Invocation, ctx: InvocationContext| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    echo(inv, ctx)
                },
                InvocationDescriptor::tool("t", CostSpec::Constant(1)),
            )
            .unwrap();

        let err = tool
            .call(Invocation::default(), Some(AuthHeaders::bearer("broke")))
            .await
            .unwrap_err();
        let wire = err.to_jsonrpc_error();
        assert_eq!(wire.code, -32003);
        assert_eq!(wire.message, "Payment required");
        assert_eq!(
            wire.data,
            Some(json!({"reason": "insufficient_balance", "plans": ["plan-basic"]}))
        );

        let err = tool
            .call(Invocation::default(), Some(AuthHeaders::bearer("nobody")))
            .await
            .unwrap_err();
        assert_eq!(err.to_jsonrpc_error().message, "Authorization required");

        let err = tool
            .call(Invocation::default(), Some(AuthHeaders::bearer("lapsed")))
            .await
            .unwrap_err();
        assert_eq!(err.to_jsonrpc_error().reason(), Some("not_subscribed"));

        assert_eq!(
            *recorder.denied.lock().unwrap(),
            vec![
                DenialReason::InsufficientBalance,
                DenialReason::InvalidToken,
                DenialReason::NotSubscribed
            ]
        );
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.start_calls().len(), 3);
        assert!(ledger.redemptions().is_empty());
    }

    #[tokio::test]
    async fn ledger_outage_during_validation_is_generic_error() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        ledger.set_unavailable(true);
        let tool = paywall(&ledger)
            .wrap(echo, InvocationDescriptor::tool("t", CostSpec::Constant(1)))
            .unwrap();

        let err = tool
            .call(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap_err();
        let wire = err.to_jsonrpc_error();
        assert_eq!(wire.code, -32002);
        assert!(!wire.message.contains("offline"));
    }

    #[tokio::test]
    async fn handler_failure_is_passed_through_unbilled() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let tool = paywall(&ledger)
            .wrap(
                |_inv: Invocation, _ctx: InvocationContext| async {
                    Err::<String, _>(HandlerError::new("city not found"))
                },
                InvocationDescriptor::tool("t", CostSpec::Constant(1)),
            )
            .unwrap();

        let err = tool
            .call(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap_err();
        let PaywallError::Handler(handler_err) = err else {
            panic!("expected handler error");
        };
        assert_eq!(handler_err.message(), "city not found");
        assert_eq!(ledger.start_calls().len(), 1);
        assert!(ledger.redemptions().is_empty());
        assert_eq!(ledger.balance("tok"), Some(10));
    }

    #[tokio::test]
    async fn settlement_failure_still_returns_the_result() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        ledger.fail_next_redeems(2);
        let recorder = Arc::new(Recorder::default());
        let tool = paywall(&ledger)
            .with_hooks(Arc::clone(&recorder))
            .wrap(echo, InvocationDescriptor::tool("t", CostSpec::Constant(1)))
            .unwrap();

        let settled = tool
            .call_with_outcome(
                invocation(json!({"city": "Paris"})),
                Some(AuthHeaders::bearer("tok")),
            )
            .await
            .unwrap();
        assert_eq!(settled.value, "hello Paris");
        assert!(matches!(settled.outcome, SettlementOutcome::Unsettled(_)));
        assert_eq!(ledger.redeem_attempts(), 2);
        assert_eq!(recorder.unsettled.lock().unwrap().len(), 1);
        assert_eq!(recorder.settled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cost_fault_returns_result_without_billing() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let recorder = Arc::new(Recorder::default());
        let tool = paywall(&ledger)
            .with_hooks(Arc::clone(&recorder))
            .wrap(
                echo,
                InvocationDescriptor::tool(
                    "t",
                    CostSpec::pre_call(|_| Err(CostError::function("no price table"))),
                ),
            )
            .unwrap();

        let value = tool
            .call(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap();
        assert_eq!(value, "hello ?");
        assert!(ledger.redemptions().is_empty());
        let unsettled = recorder.unsettled.lock().unwrap();
        assert!(matches!(unsettled[0].cause, UnsettledCause::Cost(_)));
    }

    #[tokio::test]
    async fn pre_call_cost_sees_arguments_and_context() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let cost = CostSpec::pre_call(|pre| {
            assert_eq!(pre.context.token(), "tok");
            let city = pre.argument_str("city").unwrap_or_default();
            Ok(if city.chars().count() <= 5 { 1 } else { 2 })
        });
        let tool = paywall(&ledger)
            .wrap(echo, InvocationDescriptor::tool("t", cost))
            .unwrap();

        for city in ["Paris", "Valencia"] {
            tool.call(invocation(json!({ "city": city })), Some(AuthHeaders::bearer("tok")))
                .await
                .unwrap();
        }
        let credits: Vec<u64> = ledger.redemptions().iter().map(|r| r.credits).collect();
        assert_eq!(credits, vec![1, 2]);
    }

    #[tokio::test]
    async fn post_call_cost_sees_the_result() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let cost = CostSpec::post_call(|post| {
            Ok(post.result["content"].as_array().map_or(0, Vec::len) as u64)
        });
        let tool = paywall(&ledger)
            .wrap(
                |_inv: Invocation, _ctx: InvocationContext| async {
                    Ok::<_, HandlerError>(CallToolResult::success(vec![
                        crate::types::ContentItem::text("a"),
                        crate::types::ContentItem::text("b"),
                        crate::types::ContentItem::text("c"),
                    ]))
                },
                InvocationDescriptor::tool("t", cost),
            )
            .unwrap();

        let settled = tool
            .call_with_outcome(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap();
        assert_eq!(settled.value.content.len(), 3);
        assert_eq!(settled.outcome.credits_redeemed(), 3);
    }

    #[tokio::test]
    async fn zero_cost_still_redeems_by_default() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let prompt = paywall(&ledger)
            .wrap(echo, InvocationDescriptor::prompt("p", CostSpec::Constant(0)))
            .unwrap();
        prompt
            .call(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap();
        assert_eq!(ledger.redemptions().len(), 1);
        assert_eq!(ledger.redemptions()[0].credits, 0);

        let skipping = Paywall::new(
            ledger.clone(),
            PaywallConfig::new("agent-1", "s").with_zero_cost(ZeroCostPolicy::Skip),
        )
        .wrap(echo, InvocationDescriptor::prompt("p", CostSpec::Constant(0)))
        .unwrap();
        let settled = skipping
            .call_with_outcome(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap();
        assert_eq!(settled.outcome, SettlementOutcome::SkippedZeroCost);
        assert_eq!(ledger.redemptions().len(), 1);
    }

    #[tokio::test]
    async fn charge_before_execute() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 10));
        let pw = Paywall::new(
            ledger.clone(),
            PaywallConfig::new("agent-1", "s").with_settle_before_execution(true),
        );

        let post = CostSpec::post_call(|_| Ok(1));
        let err = pw
            .wrap(echo, InvocationDescriptor::tool("late", post))
            .unwrap_err();
        assert_eq!(err.name, "late");

        let failing = pw
            .wrap(
                |_inv: Invocation, _ctx: InvocationContext| async {
                    Err::<String, _>(HandlerError::new("boom"))
                },
                InvocationDescriptor::tool("t", CostSpec::Constant(2)),
            )
            .unwrap();
        let err = failing
            .call(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap_err();
        assert!(matches!(err, PaywallError::Handler(_)));
        assert_eq!(ledger.balance("tok"), Some(8));

        ledger.fail_next_redeems(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let guarded = pw
            .wrap(
                move |_inv: Invocation, _ctx: InvocationContext| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, HandlerError>("ran") }
                },
                InvocationDescriptor::tool("t", CostSpec::Constant(1)),
            )
            .unwrap();
        let err = guarded
            .call(Invocation::default(), Some(AuthHeaders::bearer("tok")))
            .await
            .unwrap_err();
        assert!(matches!(err, PaywallError::Ledger(LedgerError::Unavailable(_))));
        assert_eq!(err.to_jsonrpc_error().code, -32002);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_calls_settle_independently() {
        let ledger = Arc::new(
            InMemoryLedger::new()
                .with_recording()
                .with_account("a", 10)
                .with_account("b", 10),
        );
        let cost = CostSpec::pre_call(|pre| Ok(if pre.context.token() == "a" { 1 } else { 3 }));
        let tool = Arc::new(
            paywall(&ledger)
                .wrap(echo, InvocationDescriptor::tool("t", cost))
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for token in ["a", "b", "a", "b"] {
            let tool = Arc::clone(&tool);
            tasks.push(tokio::spawn(async move {
                tool.call(Invocation::default(), Some(AuthHeaders::bearer(token)))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(ledger.balance("a"), Some(8));
        assert_eq!(ledger.balance("b"), Some(4));
        let mut ids: Vec<String> = ledger
            .redemptions()
            .into_iter()
            .map(|r| r.agent_request_id)
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
