//! Server configuration.
//!
//! Loaded from a TOML file. String values may reference environment
//! variables as `$VAR` or `${VAR}`.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3000
//! server_name = "weather-mcp"
//! agent_id = "$AGENT_ID"
//! context_mode = "ambient"
//! zero_cost = "redeem"
//! settle_before_execution = false
//! plans = ["plan-basic"]
//!
//! [ledger]
//! url = "https://ledger.example/api/"
//! api_key = "$LEDGER_API_KEY"
//! timeout_secs = 10
//! ```
//!
//! Without a `[ledger]` table the server runs against an in-memory ledger
//! seeded from `[accounts]`:
//!
//! ```toml
//! [accounts]
//! demo-token = 100
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use mcredit_http::ContextMode;
use mcredit_mcp::{PaywallConfig, ZeroCostPolicy};
use serde::Deserialize;

use crate::error::ServerError;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `3000`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// MCP server name, also used in logical resource ids.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// The agent whose plan callers consume.
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// How request headers reach the paywall.
    #[serde(default)]
    pub context_mode: ContextMode,

    /// Whether zero-cost calls still hit the ledger.
    #[serde(default)]
    pub zero_cost: ZeroCostPolicy,

    /// Redeem credits before running handlers.
    #[serde(default)]
    pub settle_before_execution: bool,

    /// Plan ids suggested to callers who need to buy credits.
    #[serde(default)]
    pub plans: Vec<String>,

    /// Remote ledger. When absent, `accounts` seeds an in-memory ledger.
    #[serde(default)]
    pub ledger: Option<LedgerConfig>,

    /// Local accounts: bearer token -> credit balance.
    #[serde(default)]
    pub accounts: BTreeMap<String, u64>,
}

/// Remote ledger connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Base URL of the ledger API.
    pub url: String,
    /// Sent as a bearer token to the ledger.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl LedgerConfig {
    /// The configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    3000
}

fn default_server_name() -> String {
    "weather-mcp".to_owned()
}

fn default_agent_id() -> String {
    "weather-agent".to_owned()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            agent_id: default_agent_id(),
            context_mode: ContextMode::default(),
            zero_cost: ZeroCostPolicy::default(),
            settle_before_execution: false,
            plans: Vec::new(),
            ledger: None,
            accounts: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the path in `CONFIG`, falling back to
    /// `config.toml`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ServerError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(Path::new(&path))
    }

    /// Loads configuration from `path`, then applies `HOST`/`PORT` overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ServerError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
                path: path.display().to_string(),
                source,
            })?
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            String::new()
        };
        let lookup = |name: &str| std::env::var(name).ok();
        let mut config = Self::parse(&content, lookup)?;
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Parses TOML text, expanding variables with `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ConfigParse`] for invalid TOML or fields.
    pub fn parse(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        Ok(toml::from_str(&expand_vars(content, lookup))?)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("HOST").and_then(|h| h.parse().ok()) {
            self.host = host;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }

    /// The paywall settings this configuration describes.
    #[must_use]
    pub fn paywall_config(&self) -> PaywallConfig {
        PaywallConfig::new(&self.agent_id, &self.server_name)
            .with_zero_cost(self.zero_cost)
            .with_settle_before_execution(self.settle_before_execution)
            .with_plans(self.plans.clone())
    }
}

/// Replaces `$VAR` and `${VAR}` with `lookup(VAR)`. Unknown variables are
/// kept verbatim.
fn expand_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), lookup(name)) {
            (false, Some(value)) => out.push_str(&value),
            _ => out.push_str(&rest[pos..=pos + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
