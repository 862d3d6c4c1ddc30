//! Low-level JSON-RPC router.
//!
//! [`McpRouter`] serves the subset of MCP needed to expose paywalled tools,
//! resources and prompts: `initialize`, `ping`, `tools/list`, `tools/call`,
//! `resources/list`, `resources/templates/list`, `resources/read`,
//! `prompts/list` and `prompts/get`. Notifications are accepted and produce
//! no response.
//!
//! The router is transport-agnostic: it takes raw request bytes plus the
//! request headers (explicit mode) or `None` (ambient mode) and returns the
//! response envelope.

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use mcredit::jsonrpc::{JSONRPC_VERSION, METHOD_NOT_FOUND, SERVER_ERROR};
use mcredit::{
    Arguments, AuthHeaders, BoxFuture, ErrorReason, InvocationContext, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::PaywallError;
use crate::paywall::Paywalled;
use crate::stream::{ChunkStream, PaywalledStream};
use crate::template::UriTemplate;
use crate::types::{CallToolResult, GetPromptResult, HandlerError, Invocation, ReadResourceResult};

/// Protocol version answered when the client does not propose one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

const STREAM_BUFFER: usize = 16;

type CallFn<T> =
    dyn Fn(Invocation, Option<AuthHeaders>) -> BoxFuture<'static, Result<T, PaywallError>>
        + Send
        + Sync;

/// `tools/list` metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    /// Tool name, as called by clients.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSpec {
    /// Creates a tool spec accepting any object.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object"}),
        }
    }

    /// Sets the argument schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// `resources/templates/list` metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Resource name.
    pub name: String,
    /// Template concrete URIs are matched against.
    pub uri_template: UriTemplate,
    /// MIME type of the resource body.
    pub mime_type: String,
    /// Human-readable description.
    pub description: Option<String>,
}

impl ResourceSpec {
    /// Creates a JSON resource spec.
    #[must_use]
    pub fn new(name: impl Into<String>, uri_template: UriTemplate) -> Self {
        Self {
            name: name.into(),
            uri_template,
            mime_type: "application/json".to_owned(),
            description: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One declared prompt argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    pub required: bool,
}

/// `prompts/list` metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptSpec {
    /// Prompt name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Declared arguments.
    pub arguments: Vec<PromptArgument>,
}

impl PromptSpec {
    /// Creates a prompt spec without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
        }
    }

    /// Declares an argument.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, required: bool) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: None,
            required,
        });
        self
    }
}

struct Entry<S, T: ?Sized> {
    spec: S,
    call: Arc<T>,
}

/// Dispatches MCP JSON-RPC requests to registered handlers.
pub struct McpRouter {
    name: String,
    version: String,
    tools: Vec<Entry<ToolSpec, CallFn<CallToolResult>>>,
    resources: Vec<Entry<ResourceSpec, CallFn<ReadResourceResult>>>,
    prompts: Vec<Entry<PromptSpec, CallFn<GetPromptResult>>>,
}

impl std::fmt::Debug for McpRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpRouter")
            .field("name", &self.name)
            .field("version", &self.version)
            .field(
                "tools",
                &self.tools.iter().map(|e| &e.spec.name).collect::<Vec<_>>(),
            )
            .field(
                "resources",
                &self.resources.iter().map(|e| &e.spec.name).collect::<Vec<_>>(),
            )
            .field(
                "prompts",
                &self.prompts.iter().map(|e| &e.spec.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Deserialize)]
struct NamedParams {
    name: String,
    #[serde(default)]
    arguments: Option<Arguments>,
}

#[derive(Deserialize)]
struct ReadParams {
    uri: String,
}

impl McpRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
        }
    }

    /// The server name reported by `initialize`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a paywalled tool.
    #[must_use]
    pub fn tool<H, Fut>(mut self, spec: ToolSpec, tool: Paywalled<H>) -> Self
    where
        H: Fn(Invocation, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, HandlerError>> + Send + 'static,
    {
        let tool = Arc::new(tool);
        let call = erase(move |inv, headers| {
            let tool = Arc::clone(&tool);
            async move { tool.call(inv, headers).await }.boxed()
        });
        self.tools.push(Entry { spec, call });
        self
    }

    /// Registers a paywalled streaming tool; its text chunks are joined with
    /// newlines into a single result.
    #[must_use]
    pub fn stream_tool<H>(mut self, spec: ToolSpec, tool: PaywalledStream<H>) -> Self
    where
        H: Fn(Invocation, InvocationContext) -> ChunkStream<String> + Send + Sync + 'static,
    {
        let tool = Arc::new(tool);
        let call = erase(move |inv, headers| {
            let tool = Arc::clone(&tool);
            async move {
                let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
                let collect = async move {
                    let mut chunks = Vec::new();
                    while let Some(chunk) = rx.recv().await {
                        chunks.push(chunk);
                    }
                    chunks
                };
                let (summary, chunks) = tokio::join!(
                    tool.call(inv, headers, tx, CancellationToken::new()),
                    collect
                );
                summary?;
                Ok::<_, PaywallError>(CallToolResult::text(chunks.join("\n")))
            }
            .boxed()
        });
        self.tools.push(Entry { spec, call });
        self
    }

    /// Registers a tool that is not metered.
    #[must_use]
    pub fn free_tool<H, Fut>(mut self, spec: ToolSpec, handler: H) -> Self
    where
        H: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, HandlerError>> + Send + 'static,
    {
        let call = erase(move |inv, _headers| {
            handler(inv).map(|r| r.map_err(PaywallError::Handler)).boxed()
        });
        self.tools.push(Entry { spec, call });
        self
    }

    /// Registers a paywalled resource.
    #[must_use]
    pub fn resource<H, Fut>(mut self, spec: ResourceSpec, resource: Paywalled<H>) -> Self
    where
        H: Fn(Invocation, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult, HandlerError>> + Send + 'static,
    {
        let resource = Arc::new(resource);
        let call = erase(move |inv, headers| {
            let resource = Arc::clone(&resource);
            async move { resource.call(inv, headers).await }.boxed()
        });
        self.resources.push(Entry { spec, call });
        self
    }

    /// Registers a paywalled prompt.
    #[must_use]
    pub fn prompt<H, Fut>(mut self, spec: PromptSpec, prompt: Paywalled<H>) -> Self
    where
        H: Fn(Invocation, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult, HandlerError>> + Send + 'static,
    {
        let prompt = Arc::new(prompt);
        let call = erase(move |inv, headers| {
            let prompt = Arc::clone(&prompt);
            async move { prompt.call(inv, headers).await }.boxed()
        });
        self.prompts.push(Entry { spec, call });
        self
    }

    /// Handles a raw request body.
    ///
    /// Returns `None` for notifications.
    pub async fn handle_bytes(
        &self,
        body: &[u8],
        headers: Option<AuthHeaders>,
    ) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::parse_error(),
                ));
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) if request.jsonrpc == JSONRPC_VERSION => {
                self.handle(request, headers).await
            }
            _ => Some(JsonRpcResponse::failure(id, JsonRpcError::invalid_request())),
        }
    }

    /// Handles a parsed request.
    ///
    /// Returns `None` for notifications.
    pub async fn handle(
        &self,
        request: JsonRpcRequest,
        headers: Option<AuthHeaders>,
    ) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let params = params.unwrap_or(Value::Null);

        let Some(id) = id else {
            tracing::debug!(%method, "notification received");
            return None;
        };

        let result = match method.as_str() {
            "initialize" => Ok(self.initialize(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({
                "tools": self.tools.iter().map(|e| &e.spec).collect::<Vec<_>>()
            })),
            "resources/list" => Ok(self.list_resources()),
            "resources/templates/list" => Ok(self.list_resource_templates()),
            "prompts/list" => Ok(json!({
                "prompts": self.prompts.iter().map(|e| &e.spec).collect::<Vec<_>>()
            })),
            "tools/call" => self.call_tool(params, headers).await,
            "resources/read" => self.read_resource(params, headers).await,
            "prompts/get" => self.get_prompt(params, headers).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn initialize(&self, params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "serverInfo": {"name": self.name, "version": self.version},
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
        })
    }

    fn list_resources(&self) -> Value {
        let resources: Vec<Value> = self
            .resources
            .iter()
            .map(|e| {
                json!({
                    "uri": format!("mcp://{}/resources/{}", self.name, e.spec.name),
                    "name": e.spec.name,
                    "mimeType": e.spec.mime_type,
                })
            })
            .collect();
        json!({ "resources": resources })
    }

    fn list_resource_templates(&self) -> Value {
        let templates: Vec<Value> = self
            .resources
            .iter()
            .map(|e| {
                let mut entry = json!({
                    "uriTemplate": e.spec.uri_template.as_str(),
                    "name": e.spec.name,
                    "mimeType": e.spec.mime_type,
                });
                if let (Some(description), Some(obj)) =
                    (&e.spec.description, entry.as_object_mut())
                {
                    obj.insert("description".to_owned(), json!(description));
                }
                entry
            })
            .collect();
        json!({ "resourceTemplates": templates })
    }

    async fn call_tool(
        &self,
        params: Value,
        headers: Option<AuthHeaders>,
    ) -> Result<Value, JsonRpcError> {
        let params: NamedParams = parse_params(params)?;
        let entry = self
            .tools
            .iter()
            .find(|e| e.spec.name == params.name)
            .ok_or_else(|| {
                JsonRpcError::new(METHOD_NOT_FOUND, format!("Tool not found: {}", params.name))
            })?;

        let invocation = Invocation::new(params.arguments.unwrap_or_default());
        match (entry.call)(invocation, headers).await {
            Ok(result) => to_value(&result),
            Err(PaywallError::Handler(e)) => to_value(&CallToolResult::error(e.message())),
            Err(e) => Err(e.to_jsonrpc_error()),
        }
    }

    async fn read_resource(
        &self,
        params: Value,
        headers: Option<AuthHeaders>,
    ) -> Result<Value, JsonRpcError> {
        let params: ReadParams = parse_params(params)?;
        let uri = Url::parse(&params.uri)
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid resource URI: {e}")))?;

        let (entry, variables) = self
            .resources
            .iter()
            .find_map(|e| {
                e.spec
                    .uri_template
                    .matches(&params.uri)
                    .map(|vars| (e, vars))
            })
            .ok_or_else(|| {
                JsonRpcError::invalid_params(format!("Resource not found: {}", params.uri))
            })?;

        let result = (entry.call)(Invocation::resource(uri, variables), headers)
            .await
            .map_err(|e| e.to_jsonrpc_error())?;
        to_value(&result)
    }

    async fn get_prompt(
        &self,
        params: Value,
        headers: Option<AuthHeaders>,
    ) -> Result<Value, JsonRpcError> {
        let params: NamedParams = parse_params(params)?;
        let entry = self
            .prompts
            .iter()
            .find(|e| e.spec.name == params.name)
            .ok_or_else(|| {
                JsonRpcError::invalid_params(format!("Prompt not found: {}", params.name))
            })?;

        let result = (entry.call)(
            Invocation::new(params.arguments.unwrap_or_default()),
            headers,
        )
        .await
        .map_err(|e| e.to_jsonrpc_error())?;
        to_value(&result)
    }
}

fn erase<T, F>(f: F) -> Arc<CallFn<T>>
where
    F: Fn(Invocation, Option<AuthHeaders>) -> BoxFuture<'static, Result<T, PaywallError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {e}")))
}

fn to_value<T: Serialize>(result: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(result).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize result");
        JsonRpcError::new(SERVER_ERROR, "Internal server error")
            .with_data(json!({"reason": ErrorReason::HandlerError}))
    })
}
