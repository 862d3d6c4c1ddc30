//! Axum transport for an [`McpRouter`].
//!
//! `POST /mcp` takes one JSON-RPC message per request and answers with the
//! response envelope (or `202 Accepted` for notifications). `GET /health`
//! reports liveness.
//!
//! In [`ContextMode::Explicit`] the request headers are handed to the router
//! with every call. In [`ContextMode::Ambient`] the router gets no headers;
//! instead [`AmbientContextLayer`] runs each request inside a
//! [`TaskLocalAccessor`] scope, and paywalls built with
//! [`ContextResolver::ambient`](mcredit_mcp::ContextResolver::ambient) read
//! them from there.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use mcredit::{AuthHeaders, ContextHandle};
use mcredit_mcp::{AmbientRequest, McpRouter, TaskLocalAccessor};
use serde::Deserialize;
use serde_json::json;
use tower::{Layer, Service};

/// How the caller's headers reach the paywall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Headers are passed to the router with every call.
    #[default]
    Explicit,
    /// Headers are scoped in a task-local for the duration of the request.
    Ambient,
}

#[derive(Clone)]
struct McpState {
    router: Arc<McpRouter>,
    mode: ContextMode,
}

/// Builds the `/mcp` and `/health` routes.
///
/// In ambient mode the routes are wrapped in [`AmbientContextLayer`].
pub fn mcp_routes(router: Arc<McpRouter>, mode: ContextMode) -> Router {
    let routes = Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(health))
        .with_state(McpState { router, mode });
    match mode {
        ContextMode::Explicit => routes,
        ContextMode::Ambient => routes.layer(AmbientContextLayer),
    }
}

async fn handle_mcp(State(state): State<McpState>, headers: HeaderMap, body: Bytes) -> Response {
    let explicit = match state.mode {
        ContextMode::Explicit => Some(auth_headers(&headers)),
        ContextMode::Ambient => None,
    };
    match state.router.handle_bytes(&body, explicit).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health(State(state): State<McpState>) -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "server": state.router.name()}))
}

/// Copies the request headers that are valid UTF-8 into [`AuthHeaders`].
#[must_use]
pub fn auth_headers(headers: &HeaderMap) -> AuthHeaders {
    AuthHeaders::from_pairs(
        headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
    )
}

/// Layer that makes each request's headers ambient for the handlers it
/// reaches.
///
/// The raw [`HeaderMap`] is also attached as the invocation's
/// [`ContextHandle`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientContextLayer;

impl<S> Layer<S> for AmbientContextLayer {
    type Service = AmbientContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AmbientContextService { inner }
    }
}

/// Service produced by [`AmbientContextLayer`].
#[derive(Debug, Clone)]
pub struct AmbientContextService<S> {
    inner: S,
}

impl<S> Service<Request> for AmbientContextService<S>
where
    S: Service<Request>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let ambient = AmbientRequest::new(auth_headers(req.headers()))
            .with_handle(ContextHandle::new(req.headers().clone()));
        let fut = self.inner.call(req);
        Box::pin(TaskLocalAccessor::scope(ambient, fut))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request as HttpRequest;
    use mcredit::{CostSpec, InMemoryLedger, InvocationContext, InvocationDescriptor};
    use mcredit_mcp::{
        CallToolResult, ContextResolver, HandlerError, Invocation, Paywall, PaywallConfig,
        ToolSpec,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(ledger: &Arc<InMemoryLedger>, mode: ContextMode) -> Router {
        let mut paywall = Paywall::new(ledger.clone(), PaywallConfig::new("agent-1", "test-mcp"));
        if mode == ContextMode::Ambient {
            paywall = paywall.with_resolver(ContextResolver::ambient(Arc::new(TaskLocalAccessor)));
        }
        let whoami = paywall
            .wrap(
                |_inv: Invocation, ctx: InvocationContext| async move {
                    let raw = ctx
                        .handle()
                        .and_then(|h| h.downcast_ref::<HeaderMap>())
                        .is_some();
                    Ok::<_, HandlerError>(CallToolResult::text(format!("{} {raw}", ctx.token())))
                },
                InvocationDescriptor::tool("whoami", CostSpec::Constant(1)),
            )
            .unwrap();
        let router =
            McpRouter::new("test-mcp", "0.1.0").tool(ToolSpec::new("whoami", "Who am I"), whoami);
        mcp_routes(Arc::new(router), mode)
    }

    fn call_request(token: Option<&str>) -> Request {
        let mut builder = HttpRequest::post("/mcp").header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "whoami", "arguments": {}},
        });
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording());
        let response = app(&ledger, ContextMode::Explicit)
            .oneshot(HttpRequest::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["server"], "test-mcp");
    }

    #[tokio::test]
    async fn explicit_mode_passes_headers() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 3));
        let response = app(&ledger, ContextMode::Explicit)
            .oneshot(call_request(Some("tok")))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["result"]["content"][0]["text"], "tok false");
        assert_eq!(ledger.balance("tok"), Some(2));
    }

    #[tokio::test]
    async fn ambient_mode_scopes_headers() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording().with_account("tok", 3));
        let response = app(&ledger, ContextMode::Ambient)
            .oneshot(call_request(Some("tok")))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["result"]["content"][0]["text"], "tok true");
        assert_eq!(ledger.balance("tok"), Some(2));
    }

    #[tokio::test]
    async fn missing_token_is_a_jsonrpc_error() {
        for mode in [ContextMode::Explicit, ContextMode::Ambient] {
            let ledger = Arc::new(InMemoryLedger::new().with_recording());
            let response = app(&ledger, mode).oneshot(call_request(None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["error"]["code"], -32003);
            assert_eq!(body["error"]["data"]["reason"], "missing_token");
        }
    }

    #[tokio::test]
    async fn notifications_are_accepted() {
        let ledger = Arc::new(InMemoryLedger::new().with_recording());
        let request = HttpRequest::post("/mcp")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .unwrap();
        let response = app(&ledger, ContextMode::Explicit)
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
