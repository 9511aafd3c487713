//! Tool runtime for sandcode.
//!
//! This crate provides the tools a coding agent uses to work inside a
//! sandboxed project directory, together with the machinery around them:
//! the virtual file system overlay, the transcript tag protocol, the consent
//! gate and the registry that dispatches tool calls.

pub mod collaborator;
pub mod consent;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod partial_json;
pub mod registry;
pub mod tag;
pub mod vfs;

// Tool implementations
pub mod code_search;
pub mod database;
pub mod delete;
pub mod edit;
pub mod grep;
pub mod list;
pub mod read;
pub mod rename;
pub mod todo;
pub mod type_check;
pub mod write;

pub use consent::{ConsentGate, ConsentHandler, ConsentRequest, Decision, PermissionRule};
pub use context::{AgentContext, AgentContextBuilder, AgentEvent, ContentPart};
pub use dispatch::{CallStream, Dispatcher, ToolCallOutcome};
pub use error::{ToolError, ToolResult};
pub use partial_json::parse_partial;
pub use registry::{ToolMode, ToolRegistry};
pub use tag::Tag;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Partially parsed tool arguments, as seen while a call is still streaming.
pub type PartialArgs = serde_json::Map<String, Value>;

/// Whether a tool may run without asking the user first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentPolicy {
    /// Runs without asking.
    Always,
    /// Needs an affirmative decision before every call.
    Ask,
}

/// Result of tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Title/summary of the operation.
    pub title: String,
    /// Output text handed back to the model.
    pub output: String,
    /// Tool-specific metadata.
    pub metadata: Value,
}

impl ToolOutput {
    /// Create a new tool output.
    pub fn new(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: Value::Null,
        }
    }

    /// Add metadata to the output.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The main trait for tools.
///
/// Only `id`, `description`, `parameters_schema` and `execute` are required.
/// The remaining hooks have defaults suitable for a read-only tool that
/// needs no consent and renders its scalar arguments as tag attributes.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool ID. Unique within a registry.
    fn id(&self) -> &str;

    /// Get the tool description (for the AI).
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Consent policy applied when no permission rule matches.
    fn default_consent(&self) -> ConsentPolicy {
        ConsentPolicy::Always
    }

    /// Whether the tool changes project or external state.
    fn modifies_state(&self) -> bool {
        false
    }

    /// Whether the tool should be exposed for this context at all.
    fn is_enabled(&self, _ctx: &AgentContext) -> bool {
        true
    }

    /// Human-readable summary shown when asking for consent.
    fn consent_preview(&self, _args: &Value) -> Option<String> {
        None
    }

    /// Render (possibly partial) arguments as a transcript tag.
    ///
    /// Returning `None` for an incomplete call suppresses the preview.
    fn build_tag(&self, args: &PartialArgs, is_complete: bool) -> Option<Tag> {
        let mut tag = Tag::new(self.id()).with_complete(is_complete);
        for (key, value) in args {
            match value {
                Value::String(s) => tag = tag.attr(key.as_str(), s.as_str()),
                Value::Number(n) => tag = tag.attr(key.as_str(), n.to_string()),
                Value::Bool(b) => tag = tag.attr(key.as_str(), b.to_string()),
                _ => {}
            }
        }
        Some(tag)
    }

    /// The final, persisted tag for a successful call.
    fn complete_tag(&self, args: &PartialArgs, output: &ToolOutput) -> Tag {
        match self.build_tag(args, true) {
            Some(tag) => tag.closed(),
            None => Tag::new(self.id()).body(output.title.as_str()).closed(),
        }
    }

    /// Execute the tool.
    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput>;
}

/// A boxed tool for dynamic dispatch.
pub type BoxedTool = Arc<dyn Tool>;

/// Every built-in tool, in registration order.
pub fn builtin_tools() -> Vec<BoxedTool> {
    vec![
        Arc::new(read::ReadFileTool),
        Arc::new(list::ListFilesTool),
        Arc::new(grep::GrepTool),
        Arc::new(code_search::CodeSearchTool),
        Arc::new(write::WriteFileTool),
        Arc::new(edit::EditFileTool),
        Arc::new(delete::DeleteFileTool),
        Arc::new(rename::RenameFileTool),
        Arc::new(type_check::RunTypeChecksTool),
        Arc::new(todo::UpdateTodosTool),
        Arc::new(database::GetDatabaseSchemaTool),
        Arc::new(database::ExecuteSqlTool),
    ]
}
