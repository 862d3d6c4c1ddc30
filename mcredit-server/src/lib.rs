//! Demo weather MCP server.
//!
//! Serves the weather handlers of [`weather`] behind a credit paywall, over
//! the axum transport of `mcredit-http`.
//!
//! # Modules
//!
//! - [`audit`] - Ledger audit logging
//! - [`config`] - Server configuration with environment variable expansion
//! - [`error`] - Server error types
//! - [`shutdown`] - Graceful shutdown on OS signals
//! - [`weather`] - Weather handlers and their registration

pub mod audit;
pub mod config;
pub mod error;
pub mod shutdown;
pub mod weather;

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use mcredit::{HookedLedger, InMemoryLedger, Ledger};
use mcredit_http::{ContextMode, HttpLedger, mcp_routes};
use mcredit_mcp::{ContextResolver, Paywall, TaskLocalAccessor};
use tower_http::cors;
use tower_http::trace::TraceLayer;

use crate::audit::LedgerAudit;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// Builds the ledger the configuration points at: the remote ledger when a
/// `[ledger]` table is present, otherwise an in-memory one seeded from
/// `[accounts]`.
///
/// # Errors
///
/// Returns [`ServerError::Ledger`] if the ledger URL is invalid.
pub fn build_ledger(config: &ServerConfig) -> Result<Arc<dyn Ledger>, ServerError> {
    if let Some(remote) = &config.ledger {
        let mut client = HttpLedger::try_from(remote.url.as_str())?;
        if let Some(api_key) = &remote.api_key {
            client = client.with_api_key(api_key);
        }
        if let Some(timeout) = remote.timeout() {
            client = client.with_timeout(timeout);
        }
        tracing::info!(url = %client.base_url(), "using remote ledger");
        return Ok(Arc::new(client));
    }

    tracing::info!(accounts = config.accounts.len(), "using in-memory ledger");
    let ledger = config
        .accounts
        .iter()
        .fold(InMemoryLedger::new(), |ledger, (token, balance)| {
            ledger.with_account(token, *balance)
        });
    Ok(Arc::new(ledger))
}

/// Builds the application against the configured ledger.
///
/// # Errors
///
/// Returns [`ServerError`] if the ledger or a handler cannot be set up.
pub fn build_app(config: &ServerConfig) -> Result<Router, ServerError> {
    build_app_with_ledger(config, build_ledger(config)?)
}

/// Builds the application against `ledger`.
///
/// # Errors
///
/// Returns [`ServerError`] if a handler cannot be registered.
pub fn build_app_with_ledger(
    config: &ServerConfig,
    ledger: Arc<dyn Ledger>,
) -> Result<Router, ServerError> {
    let ledger: Arc<dyn Ledger> = Arc::new(HookedLedger::new(ledger).with_hook(LedgerAudit));
    let resolver = match config.context_mode {
        ContextMode::Explicit => ContextResolver::explicit(),
        ContextMode::Ambient => ContextResolver::ambient(Arc::new(TaskLocalAccessor)),
    };

    let paywall_config = config.paywall_config();
    let paywall = Paywall::new(Arc::clone(&ledger), paywall_config.clone())
        .with_resolver(resolver.clone());
    let streaming = Paywall::new(ledger, paywall_config.with_settle_before_execution(false))
        .with_resolver(resolver);

    let router = weather::weather_router(&paywall, &streaming, env!("CARGO_PKG_VERSION"))?;

    Ok(mcp_routes(Arc::new(router), config.context_mode)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        ))
}
