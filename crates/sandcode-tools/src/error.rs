//! Tool error types.

use sandcode_util::PathSafetyError;
use std::time::Duration;
use thiserror::Error;

/// Result type for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors that can occur while dispatching or executing a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A path argument escapes the project root.
    #[error("Path traversal rejected: '{0}' is outside the project root")]
    PathTraversal(String),

    /// Arguments did not match the tool's input schema.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The consent gate refused the call.
    #[error("Consent denied: {0}")]
    ConsentDenied(String),

    /// The tool body failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// An external collaborator (HTTP service or subprocess) failed.
    #[error("{service} failed{}: {body}", status_suffix(.status))]
    ExternalService {
        service: String,
        status: Option<u16>,
        body: String,
    },

    /// Operation timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Invalid registry setup, such as a duplicate tool name.
    #[error("Tool registration error: {0}")]
    Registration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a consent denied error.
    pub fn consent_denied(message: impl Into<String>) -> Self {
        Self::ConsentDenied(message.into())
    }

    /// Create an execution failed error.
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound(path.into())
    }

    /// Create an external service error.
    pub fn external(service: impl Into<String>, status: Option<u16>, body: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            status,
            body: body.into(),
        }
    }

    /// Short machine-readable category, used as the `kind` attribute of error tags.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::PathTraversal(_) => "path_traversal",
            ToolError::Validation(_) | ToolError::Json(_) => "schema_validation",
            ToolError::ConsentDenied(_) => "consent_denied",
            ToolError::ExternalService { .. } | ToolError::Timeout(_) => "external_service_failure",
            ToolError::Registration(_) => "registration",
            ToolError::ExecutionFailed(_) | ToolError::FileNotFound(_) | ToolError::Io(_) => {
                "execution_failure"
            }
        }
    }

    /// Text handed back to the model so it can react to the failure.
    pub fn model_message(&self, tool: &str) -> String {
        match self {
            ToolError::PathTraversal(path) => format!(
                "Tool '{tool}' was rejected: '{path}' is outside the project root. Use a project-relative path without '..'."
            ),
            ToolError::Validation(message) => {
                format!("Invalid input for tool '{tool}': {message}")
            }
            ToolError::ConsentDenied(_) => format!(
                "Tool '{tool}' was not run: the user declined to allow it. Try a different approach."
            ),
            ToolError::Timeout(duration) => format!(
                "Tool '{tool}' timed out after {}s. Try a narrower scope.",
                duration.as_secs()
            ),
            other => format!("Tool '{tool}' failed: {other}"),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl From<PathSafetyError> for ToolError {
    fn from(err: PathSafetyError) -> Self {
        match err {
            PathSafetyError::PathTraversal(path) => ToolError::PathTraversal(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_taxonomy() {
        assert_eq!(ToolError::PathTraversal("..".into()).kind(), "path_traversal");
        assert_eq!(ToolError::validation("x").kind(), "schema_validation");
        assert_eq!(ToolError::consent_denied("x").kind(), "consent_denied");
        assert_eq!(ToolError::execution_failed("x").kind(), "execution_failure");
        assert_eq!(
            ToolError::external("code search", Some(502), "bad gateway").kind(),
            "external_service_failure"
        );
    }

    #[test]
    fn test_external_display_includes_status_and_body() {
        let err = ToolError::external("SQL execution", Some(500), "syntax error at or near");
        assert_eq!(
            err.to_string(),
            "SQL execution failed with status 500: syntax error at or near"
        );

        let err = ToolError::external("ripgrep", None, "not installed");
        assert_eq!(err.to_string(), "ripgrep failed: not installed");
    }

    #[test]
    fn test_path_safety_conversion() {
        let err: ToolError = PathSafetyError::PathTraversal("../x".into()).into();
        assert!(matches!(err, ToolError::PathTraversal(p) if p == "../x"));
    }

    #[test]
    fn test_model_message_mentions_tool() {
        let msg = ToolError::consent_denied("execute_sql").model_message("execute_sql");
        assert!(msg.contains("execute_sql"));
        assert!(msg.contains("declined"));
    }
}
