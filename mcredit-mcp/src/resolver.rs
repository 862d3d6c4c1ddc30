//! Context resolution.
//!
//! A paywalled call needs the caller's bearer token. In explicit mode the
//! router threads the raw request headers into every call; in ambient mode a
//! [`ContextAccessor`] injected at construction reports the headers of the
//! request currently being served.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use mcredit::{AuthHeaders, ContextError, ContextHandle, InvocationContext, InvocationKind};

/// Headers (and optional framework handle) of the request being served.
#[derive(Debug, Clone, Default)]
pub struct AmbientRequest {
    /// Request headers.
    pub headers: AuthHeaders,
    /// Framework value to expose to handlers.
    pub handle: Option<ContextHandle>,
}

impl AmbientRequest {
    /// Creates an ambient request without a handle.
    #[must_use]
    pub const fn new(headers: AuthHeaders) -> Self {
        Self {
            headers,
            handle: None,
        }
    }

    /// Attaches a framework handle.
    #[must_use]
    pub fn with_handle(mut self, handle: ContextHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}

/// Reports the request the current call belongs to.
///
/// Implementations must return the request of the *current* call only; a
/// value visible to one call must never leak into another.
pub trait ContextAccessor: Send + Sync {
    /// Returns the current request, if any.
    fn current(&self) -> Option<AmbientRequest>;
}

tokio::task_local! {
    static AMBIENT_REQUEST: AmbientRequest;
}

/// A [`ContextAccessor`] backed by a tokio task-local.
///
/// The transport runs each request inside [`TaskLocalAccessor::scope`]; the
/// value is only visible to futures polled within that scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalAccessor;

impl TaskLocalAccessor {
    /// Runs `fut` with `request` as the ambient request.
    pub async fn scope<F: Future>(request: AmbientRequest, fut: F) -> F::Output {
        AMBIENT_REQUEST.scope(request, fut).await
    }
}

impl ContextAccessor for TaskLocalAccessor {
    fn current(&self) -> Option<AmbientRequest> {
        AMBIENT_REQUEST.try_with(Clone::clone).ok()
    }
}

/// Normalizes the caller's auth context into an [`InvocationContext`].
#[derive(Clone, Default)]
pub struct ContextResolver {
    accessor: Option<Arc<dyn ContextAccessor>>,
}

impl fmt::Debug for ContextResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextResolver")
            .field("ambient", &self.accessor.is_some())
            .finish()
    }
}

impl ContextResolver {
    /// A resolver that only accepts explicit headers.
    #[must_use]
    pub fn explicit() -> Self {
        Self::default()
    }

    /// A resolver that falls back to `accessor` when no headers are passed.
    #[must_use]
    pub fn ambient(accessor: Arc<dyn ContextAccessor>) -> Self {
        Self {
            accessor: Some(accessor),
        }
    }

    /// Whether an ambient accessor is configured.
    #[must_use]
    pub const fn is_ambient(&self) -> bool {
        self.accessor.is_some()
    }

    /// Resolves the context of one call.
    ///
    /// Explicit headers win and are never merged with ambient ones. When they
    /// are absent the accessor, if any, is queried exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoAuthorizationHeader`] when no bearer token
    /// can be found.
    pub fn resolve(
        &self,
        explicit: Option<AuthHeaders>,
        kind: InvocationKind,
    ) -> Result<InvocationContext, ContextError> {
        if let Some(headers) = explicit {
            return InvocationContext::from_headers(headers);
        }

        let Some(request) = self.accessor.as_ref().and_then(|a| a.current()) else {
            tracing::debug!(%kind, "no request context available");
            return Err(ContextError::NoAuthorizationHeader);
        };

        let ctx = InvocationContext::from_headers(request.headers)?;
        Ok(match request.handle {
            Some(handle) => ctx.with_handle(handle),
            None => ctx,
        })
    }
}
