//! Error types for the weather server.

use mcredit::DescriptorError;
use mcredit_http::HttpLedgerError;
use mcredit_mcp::TemplateError;

/// Errors that can stop the server from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configuration file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Path of the configuration file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML or has bad fields.
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The remote ledger client could not be built.
    #[error("ledger client: {0}")]
    Ledger(#[from] HttpLedgerError),

    /// A handler was registered with an unusable descriptor.
    #[error("{0}")]
    Descriptor(#[from] DescriptorError),

    /// A resource URI template is malformed.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// Binding or serving failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
