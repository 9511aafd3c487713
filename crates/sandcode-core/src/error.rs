//! Error types for the core crate.

use sandcode_tools::ToolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Building the tool set failed, e.g. on a duplicate registration.
    #[error("tool setup failed: {0}")]
    Tool(#[from] ToolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Problems with a configuration source.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The source is not valid JSON after comment stripping.
    #[error("invalid config in {path}: {message}")]
    InvalidJson { path: String, message: String },

    #[error("invalid config: {message}")]
    Validation { message: String },

    /// `{env:NAME}` referenced an unset variable.
    #[error("{{env:{name}}} is not set")]
    EnvVarNotFound { name: String },

    /// `{file:path}` referenced a file that could not be read.
    #[error("{{file:{path}}} could not be read")]
    FileRefNotFound { path: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
