//! Consent and enablement gate.
//!
//! Two questions are answered here before a tool runs:
//! - is the tool exposed at all for this context and mode ([`is_exposed`])
//! - may this particular call run ([`ConsentGate::check`])
//!
//! The second one consults configured [`PermissionRule`]s first. When none
//! matches, the tool's own [`ConsentPolicy`] applies: `Always` tools run,
//! `Ask` tools wait for the user through the context's [`ConsentHandler`].

use crate::registry::ToolMode;
use crate::{AgentContext, ConsentPolicy, Tool, ToolError, ToolResult};
use async_trait::async_trait;
use sandcode_util::wildcard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Permission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Allow the action.
    Allow,
    /// Deny the action.
    Deny,
    /// Ask the user.
    #[default]
    Ask,
}

/// A permission rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Tool name pattern (supports wildcards).
    pub tool: String,
    /// Path pattern (supports wildcards), matched against the `path` argument.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Decision for matching requests.
    pub decision: Decision,
}

impl PermissionRule {
    /// Create a new rule that allows a tool.
    pub fn allow(tool: impl Into<String>) -> Self {
        Self::new(tool, Decision::Allow)
    }

    /// Create a new rule that denies a tool.
    pub fn deny(tool: impl Into<String>) -> Self {
        Self::new(tool, Decision::Deny)
    }

    /// Create a new rule that always asks.
    pub fn ask(tool: impl Into<String>) -> Self {
        Self::new(tool, Decision::Ask)
    }

    fn new(tool: impl Into<String>, decision: Decision) -> Self {
        Self {
            tool: tool.into(),
            path: None,
            decision,
        }
    }

    /// Add a path pattern to the rule.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Check if this rule matches a call.
    pub fn matches(&self, tool: &str, path: Option<&str>) -> bool {
        if !wildcard::matches(&self.tool, tool) {
            return false;
        }
        match (&self.path, path) {
            (Some(pattern), Some(path)) => wildcard::matches(pattern, path),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    fn specificity(&self) -> u32 {
        wildcard::specificity(&self.tool) + self.path.as_deref().map_or(0, wildcard::specificity)
    }
}

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequest {
    pub call_id: String,
    pub tool: String,
    /// Summary from [`Tool::consent_preview`], if the tool provides one.
    pub preview: Option<String>,
}

impl ConsentRequest {
    pub fn new(call_id: impl Into<String>, tool: impl Into<String>, preview: Option<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            preview,
        }
    }
}

/// Answers consent requests, typically by asking the user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsentHandler: Send + Sync {
    /// Return `true` to let the call run.
    async fn request_consent(&self, request: &ConsentRequest) -> bool;
}

/// Approves everything. Used for non-interactive runs that opted in.
pub struct AutoApprove;

#[async_trait]
impl ConsentHandler for AutoApprove {
    async fn request_consent(&self, request: &ConsentRequest) -> bool {
        debug!(tool = %request.tool, call_id = %request.call_id, "Auto-approving tool call");
        true
    }
}

/// Refuses everything. Used when no one is available to answer.
pub struct DenyAll;

#[async_trait]
impl ConsentHandler for DenyAll {
    async fn request_consent(&self, request: &ConsentRequest) -> bool {
        debug!(tool = %request.tool, call_id = %request.call_id, "Denying tool call");
        false
    }
}

/// Static half of the gate: whether a tool is offered to the model at all.
///
/// State-modifying tools are hidden in read-only mode regardless of
/// their own enablement predicate.
pub fn is_exposed(tool: &dyn Tool, ctx: &AgentContext, mode: ToolMode) -> bool {
    if mode == ToolMode::ReadOnly && tool.modifies_state() {
        return false;
    }
    tool.is_enabled(ctx)
}

/// Dynamic half of the gate: per-call consent.
#[derive(Debug, Clone, Default)]
pub struct ConsentGate {
    rules: Vec<PermissionRule>,
}

impl ConsentGate {
    pub fn new(rules: Vec<PermissionRule>) -> Self {
        Self { rules }
    }

    /// Add a rule. Later rules win ties in specificity.
    pub fn add_rule(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[PermissionRule] {
        &self.rules
    }

    /// Decide without asking anyone.
    ///
    /// The most specific matching rule wins. Without a match, `Always`
    /// tools are allowed and `Ask` tools need the user.
    pub fn decide(&self, tool: &dyn Tool, args: &Value) -> Decision {
        let path = args.get("path").and_then(|v| v.as_str());
        let rule = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.matches(tool.id(), path))
            .max_by_key(|(index, rule)| (rule.specificity(), *index))
            .map(|(_, rule)| rule);

        match rule {
            Some(rule) => rule.decision,
            None => match tool.default_consent() {
                ConsentPolicy::Always => Decision::Allow,
                ConsentPolicy::Ask => Decision::Ask,
            },
        }
    }

    /// Resolve consent for one call, asking the user when needed.
    ///
    /// Returns [`ToolError::ConsentDenied`] unless the call may run.
    pub async fn check(
        &self,
        tool: &dyn Tool,
        args: &Value,
        call_id: &str,
        ctx: &AgentContext,
    ) -> ToolResult<()> {
        match self.decide(tool, args) {
            Decision::Allow => Ok(()),
            Decision::Deny => {
                info!(tool = %tool.id(), call_id, "Tool call denied by rule");
                Err(ToolError::consent_denied(format!(
                    "'{}' is denied by configuration",
                    tool.id()
                )))
            }
            Decision::Ask => {
                let request = ConsentRequest::new(call_id, tool.id(), tool.consent_preview(args));
                debug!(tool = %tool.id(), call_id, "Requesting consent");
                if ctx.request_consent(&request).await {
                    Ok(())
                } else {
                    info!(tool = %tool.id(), call_id, "Tool call declined");
                    Err(ToolError::consent_denied(format!(
                        "The user declined '{}'",
                        tool.id()
                    )))
                }
            }
        }
    }
}
