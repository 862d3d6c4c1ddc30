//! Paywalled streaming handlers.
//!
//! A streaming handler returns a [`ChunkStream`]. The paywall pulls it to the
//! end, forwarding every chunk to a caller-owned channel, and only then
//! resolves the cost and settles. Post-call cost functions see the whole
//! stream as a JSON array and the number of chunks delivered.
//!
//! Cancelling the token or dropping the receiver stops the pull. A stream
//! stopped that way is not billed unless its descriptor opts into
//! [`bill_partial_streams`](mcredit::InvocationDescriptor::bill_partial_streams),
//! in which case it is billed for what was delivered.

use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use mcredit::{AuthHeaders, CostError, DescriptorError, InvocationContext, InvocationDescriptor};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PaywallError;
use crate::paywall::Paywall;
use crate::settlement::SettlementOutcome;
use crate::types::{HandlerError, Invocation};

/// The stream a streaming handler returns.
pub type ChunkStream<O> = BoxStream<'static, Result<O, HandlerError>>;

/// How a streamed call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Chunks delivered to the receiver.
    pub chunks: usize,
    /// Whether the stream was stopped before it ended.
    pub cancelled: bool,
    /// Accounting result.
    pub outcome: SettlementOutcome,
}

impl Paywall {
    /// Wraps a streaming handler.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] under the same conditions as
    /// [`Paywall::wrap`].
    pub fn wrap_stream<H>(
        &self,
        handler: H,
        descriptor: InvocationDescriptor,
    ) -> Result<PaywalledStream<H>, DescriptorError> {
        self.check_descriptor(&descriptor)?;
        Ok(PaywalledStream {
            paywall: self.clone(),
            descriptor: Arc::new(descriptor),
            handler,
        })
    }
}

/// A streaming handler guarded by a [`Paywall`].
pub struct PaywalledStream<H> {
    paywall: Paywall,
    descriptor: Arc<InvocationDescriptor>,
    handler: H,
}

impl<H> fmt::Debug for PaywalledStream<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaywalledStream")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<H> PaywalledStream<H> {
    /// The descriptor this handler is metered under.
    #[must_use]
    pub fn descriptor(&self) -> &InvocationDescriptor {
        &self.descriptor
    }

    /// Runs the call, forwarding chunks to `sender` until the stream ends or
    /// `cancel` fires.
    ///
    /// Settlement happens after the last chunk, before this returns.
    ///
    /// # Errors
    ///
    /// Same as [`Paywalled::call_with_outcome`](crate::Paywalled::call_with_outcome);
    /// a chunk error counts as a handler failure and stops the stream.
    pub async fn call<O>(
        &self,
        invocation: Invocation,
        headers: Option<AuthHeaders>,
        sender: mpsc::Sender<O>,
        cancel: CancellationToken,
    ) -> Result<StreamSummary, PaywallError>
    where
        H: Fn(Invocation, InvocationContext) -> ChunkStream<O>,
        O: Serialize,
    {
        let descriptor = &*self.descriptor;
        let admitted = self.paywall.admit(descriptor, &invocation, headers).await?;
        let keep_chunks = admitted.prepaid.is_none() && !descriptor.cost.is_known_before_execution();

        let mut stream = (self.handler)(invocation.clone(), admitted.ctx.clone());
        let mut collected = Vec::new();
        let mut serialization_error: Option<CostError> = None;
        let mut delivered = 0_usize;
        let mut cancelled = false;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = stream.next() => next,
            };

            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    tracing::debug!(
                        name = %descriptor.name,
                        agent_request_id = %admitted.granted.agent_request_id,
                        delivered,
                        error = %e,
                        "stream failed, not billing"
                    );
                    return Err(PaywallError::Handler(e));
                }
            };

            let mut value = None;
            if keep_chunks && serialization_error.is_none() {
                match serde_json::to_value(&chunk) {
                    Ok(v) => value = Some(v),
                    Err(e) => serialization_error = Some(e.into()),
                }
            }

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => false,
                sent = sender.send(chunk) => sent.is_ok(),
            };
            if !sent {
                cancelled = true;
                break;
            }
            // Only delivered chunks are priced.
            collected.extend(value);
            delivered += 1;
        }
        drop(stream);

        if cancelled && !descriptor.bill_partial_streams && admitted.prepaid.is_none() {
            tracing::debug!(
                name = %descriptor.name,
                agent_request_id = %admitted.granted.agent_request_id,
                delivered,
                "stream cancelled, not billing"
            );
            return Ok(StreamSummary {
                chunks: delivered,
                cancelled,
                outcome: SettlementOutcome::Cancelled,
            });
        }

        let outcome = self
            .paywall
            .finish(
                descriptor,
                &invocation,
                admitted,
                move || match serialization_error {
                    Some(e) => Err(e),
                    None => Ok(Value::Array(collected)),
                },
                Some(delivered),
            )
            .await;

        Ok(StreamSummary {
            chunks: delivered,
            cancelled,
            outcome,
        })
    }
}
