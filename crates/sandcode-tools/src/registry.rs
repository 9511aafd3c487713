//! Tool registry.

use crate::consent::is_exposed;
use crate::{AgentContext, BoxedTool, ToolError, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Which tools a turn may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    #[default]
    ReadWrite,
    /// State-modifying tools are hidden.
    ReadOnly,
}

/// Registry of available tools.
///
/// Tools are kept in registration order so the model always sees the same
/// list for the same configuration.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    index: HashMap<String, usize>,
    disabled: HashSet<String>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in tools.
    pub fn with_builtins() -> ToolResult<Self> {
        let mut registry = Self::new();
        registry.register_all(crate::builtin_tools())?;
        Ok(registry)
    }

    /// Register a tool.
    ///
    /// Fails on a duplicate id or a schema that does not compile.
    pub fn register(&mut self, tool: BoxedTool) -> ToolResult<()> {
        let id = tool.id().to_string();
        if self.index.contains_key(&id) {
            return Err(ToolError::Registration(format!(
                "tool '{id}' is already registered"
            )));
        }
        if let Err(e) = jsonschema::validator_for(&tool.parameters_schema()) {
            return Err(ToolError::Registration(format!(
                "tool '{id}' has an invalid input schema: {e}"
            )));
        }
        debug!(tool = %id, "Registered tool");
        self.index.insert(id, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Register several tools, stopping at the first failure.
    pub fn register_all(&mut self, tools: impl IntoIterator<Item = BoxedTool>) -> ToolResult<()> {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    /// Turn a tool off (or back on) regardless of its own predicate.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) {
        if enabled {
            self.disabled.remove(id);
        } else {
            self.disabled.insert(id.to_string());
        }
    }

    /// Get a tool by ID.
    pub fn get(&self, id: &str) -> Option<&BoxedTool> {
        self.index.get(id).map(|&i| &self.tools[i])
    }

    /// List all tool IDs.
    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.id()).collect()
    }

    /// Get all tools.
    pub fn all(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.iter()
    }

    /// Whether a tool may be offered and called in this context and mode.
    pub fn is_active(&self, tool: &BoxedTool, ctx: &AgentContext, mode: ToolMode) -> bool {
        !self.disabled.contains(tool.id()) && is_exposed(tool.as_ref(), ctx, mode)
    }

    /// Look up a tool that is active for this context and mode.
    pub fn get_active(&self, id: &str, ctx: &AgentContext, mode: ToolMode) -> Option<&BoxedTool> {
        self.get(id).filter(|tool| self.is_active(tool, ctx, mode))
    }

    /// The tools the model may call this turn.
    pub fn active_tools(&self, ctx: &AgentContext, mode: ToolMode) -> Vec<BoxedTool> {
        self.tools
            .iter()
            .filter(|tool| self.is_active(tool, ctx, mode))
            .cloned()
            .collect()
    }

    /// Provider-facing definitions for the active tools.
    pub fn definitions(&self, ctx: &AgentContext, mode: ToolMode) -> Vec<Value> {
        self.active_tools(ctx, mode)
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.id(),
                    "description": tool.description(),
                    "input_schema": tool.parameters_schema(),
                })
            })
            .collect()
    }
}
