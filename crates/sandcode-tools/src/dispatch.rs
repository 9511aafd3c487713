//! Tool call dispatch.
//!
//! A call moves through these steps:
//! 1. argument text streams in; each change may emit a preview tag
//! 2. the finished text is parsed and validated against the tool's schema
//! 3. the consent gate decides whether the call may run
//! 4. the tool executes
//! 5. exactly one closed tag is emitted, error-flavored on failure
//!
//! Previews go through [`Dispatcher::stream_preview`] with a mutable
//! [`CallStream`]; [`Dispatcher::dispatch`] consumes the stream, so no
//! preview can follow the final tag.

use crate::consent::ConsentGate;
use crate::partial_json::parse_partial;
use crate::registry::{ToolMode, ToolRegistry};
use crate::tag::Tag;
use crate::{AgentContext, BoxedTool, ToolError, ToolOutput, ToolResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Accumulated state of one streaming tool call.
#[derive(Debug, Clone)]
pub struct CallStream {
    call_id: String,
    tool: String,
    arguments: String,
    last_preview: Option<Tag>,
}

impl CallStream {
    pub fn new(call_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            arguments: String::new(),
            last_preview: None,
        }
    }

    /// A call whose arguments arrived in one piece.
    pub fn complete(call_id: impl Into<String>, tool: impl Into<String>, arguments: impl Into<String>) -> Self {
        let mut stream = Self::new(call_id, tool);
        stream.arguments = arguments.into();
        stream
    }

    /// Append an argument fragment.
    pub fn push(&mut self, delta: &str) {
        self.arguments.push_str(delta);
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }
}

/// Result of one dispatched call.
#[derive(Debug)]
pub struct ToolCallOutcome {
    pub call_id: String,
    pub tool: String,
    pub result: ToolResult<ToolOutput>,
}

impl ToolCallOutcome {
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    /// Text fed back to the model as the tool result.
    pub fn model_text(&self) -> String {
        match &self.result {
            Ok(output) => output.output.clone(),
            Err(e) => e.model_message(&self.tool),
        }
    }
}

/// Routes tool calls to registered tools.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    gate: ConsentGate,
    mode: ToolMode,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, gate: ConsentGate, mode: ToolMode) -> Self {
        Self {
            registry,
            gate,
            mode,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    /// Provider-facing definitions of the tools this dispatcher will run.
    pub fn definitions(&self, ctx: &AgentContext) -> Vec<Value> {
        self.registry.definitions(ctx, self.mode)
    }

    fn lookup(&self, name: &str, ctx: &AgentContext) -> Option<BoxedTool> {
        self.registry.get_active(name, ctx, self.mode).cloned()
    }

    /// Whether a call to `name` may change state. Unknown tools count as
    /// read-only since they fail before doing anything.
    pub fn modifies_state(&self, name: &str, ctx: &AgentContext) -> bool {
        self.lookup(name, ctx).is_some_and(|tool| tool.modifies_state())
    }

    /// Emit a preview tag for the arguments received so far.
    ///
    /// Nothing is sent when the tool suppresses previews, is unknown, or the
    /// rendered tag equals the previous preview.
    pub fn stream_preview(&self, call: &mut CallStream, ctx: &AgentContext) {
        let Some(tool) = self.lookup(&call.tool, ctx) else {
            return;
        };
        let partial = parse_partial(&call.arguments);
        let Some(tag) = tool.build_tag(&partial, false) else {
            return;
        };
        let tag = tag.with_complete(false);
        if call.last_preview.as_ref() == Some(&tag) {
            return;
        }
        ctx.stream_tag(&call.call_id, tag.clone());
        call.last_preview = Some(tag);
    }

    /// Validate, gate and execute a finished call, then emit its final tag.
    pub async fn dispatch(&self, call: CallStream, ctx: &AgentContext) -> ToolCallOutcome {
        let CallStream {
            call_id,
            tool: name,
            arguments,
            ..
        } = call;
        let start = Instant::now();

        let (result, tag) = match self.run(&call_id, &name, &arguments, ctx).await {
            Ok((output, tag)) => (Ok(output), tag),
            Err(e) => {
                warn!(tool = %name, call_id = %call_id, kind = e.kind(), error = %e, "Tool call failed");
                let tag = Tag::error(&name, e.kind(), &e.to_string());
                (Err(e), tag)
            }
        };

        debug!(
            tool = %name,
            call_id = %call_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        ctx.complete_tag(&call_id, tag);

        ToolCallOutcome {
            call_id,
            tool: name,
            result,
        }
    }

    async fn run(
        &self,
        call_id: &str,
        name: &str,
        arguments: &str,
        ctx: &AgentContext,
    ) -> ToolResult<(ToolOutput, Tag)> {
        let tool = self
            .lookup(name, ctx)
            .ok_or_else(|| ToolError::validation(format!("Unknown tool '{name}'")))?;

        let args = parse_arguments(arguments)?;
        let schema = tool.parameters_schema();
        if let Err(e) = jsonschema::validate(&schema, &args) {
            return Err(ToolError::validation(e.to_string()));
        }

        self.gate.check(tool.as_ref(), &args, call_id, ctx).await?;

        info!(tool = %name, call_id, "Executing tool");
        let partial = args.as_object().cloned().unwrap_or_default();
        let output = tool.execute(args, ctx).await?;
        let tag = tool.complete_tag(&partial, &output);
        Ok((output, tag))
    }
}

/// Strict parse of the final argument text. Empty text means no arguments.
fn parse_arguments(text: &str) -> ToolResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ToolError::validation(format!("Arguments are not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(ToolError::validation("Arguments must be a JSON object"));
    }
    Ok(value)
}
