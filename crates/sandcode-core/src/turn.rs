//! Turn orchestration.
//!
//! A [`Turn`] consumes the tool-call chunks of one model response, streams
//! preview tags while arguments arrive, and then runs the finished calls.
//!
//! Execution rules:
//! - a batch of only non-mutating calls runs concurrently
//! - a batch containing any mutating call runs one call at a time, in order
//! - outcomes are returned in the order the calls completed
//!
//! Aborting stops the turn from waiting. Calls already spawned keep running
//! to completion, but the context is detached so their events are dropped.

use futures::stream::{FuturesUnordered, StreamExt};
use sandcode_tools::{AgentContext, CallStream, Dispatcher, Tag, ToolCallOutcome, ToolError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One chunk of a streamed tool call, as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// A new call begins.
    Start { id: String, name: String },
    /// More argument text for a call.
    Delta { id: String, text: String },
    /// The call's arguments are complete.
    End { id: String },
}

/// What a turn produced.
#[derive(Debug, Default)]
pub struct TurnResult {
    /// Outcomes in completion order.
    pub outcomes: Vec<ToolCallOutcome>,
    /// Whether the turn was aborted before every call finished.
    pub aborted: bool,
}

impl TurnResult {
    /// `(call_id, text)` pairs to feed back to the model.
    pub fn model_results(&self) -> Vec<(String, String)> {
        self.outcomes
            .iter()
            .map(|o| (o.call_id.clone(), o.model_text()))
            .collect()
    }
}

/// Drives the tool calls of one model turn.
pub struct Turn {
    dispatcher: Arc<Dispatcher>,
    ctx: Arc<AgentContext>,
    /// Calls still receiving arguments, in start order.
    open: Vec<CallStream>,
    /// Calls whose arguments are complete, in end order.
    finished: Vec<CallStream>,
    cancel: CancellationToken,
}

impl Turn {
    pub fn new(dispatcher: Arc<Dispatcher>, ctx: Arc<AgentContext>) -> Self {
        Self {
            dispatcher,
            ctx,
            open: Vec::new(),
            finished: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Token that aborts this turn when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop waiting for calls and drop any events they still produce.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.ctx.detach();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of calls not yet run.
    pub fn pending(&self) -> usize {
        self.open.len() + self.finished.len()
    }

    /// Feed one provider chunk.
    pub fn push(&mut self, chunk: StreamChunk) {
        if self.is_aborted() {
            return;
        }
        match chunk {
            StreamChunk::Start { id, name } => {
                if self.position(&id).is_some() || self.finished.iter().any(|c| c.call_id() == id) {
                    warn!(call_id = %id, "Ignoring duplicate tool call start");
                    return;
                }
                debug!(call_id = %id, tool = %name, "Tool call started");
                self.open.push(CallStream::new(id, name));
            }
            StreamChunk::Delta { id, text } => {
                let Some(index) = self.position(&id) else {
                    warn!(call_id = %id, "Delta for unknown tool call");
                    return;
                };
                let call = &mut self.open[index];
                call.push(&text);
                self.dispatcher.stream_preview(call, &self.ctx);
            }
            StreamChunk::End { id } => {
                let Some(index) = self.position(&id) else {
                    warn!(call_id = %id, "End for unknown tool call");
                    return;
                };
                let call = self.open.remove(index);
                debug!(call_id = %id, tool = %call.tool(), "Tool call arguments complete");
                self.finished.push(call);
            }
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.open.iter().position(|c| c.call_id() == id)
    }

    /// Run every call received so far.
    ///
    /// Calls whose stream never ended are run with the arguments they have;
    /// incomplete JSON then fails validation and still gets a final tag.
    pub async fn run(&mut self) -> TurnResult {
        let mut calls = std::mem::take(&mut self.finished);
        calls.append(&mut self.open);
        if calls.is_empty() {
            return TurnResult::default();
        }
        if self.is_aborted() {
            return TurnResult {
                outcomes: Vec::new(),
                aborted: true,
            };
        }

        let concurrent = calls
            .iter()
            .all(|c| !self.dispatcher.modifies_state(c.tool(), &self.ctx));
        info!(calls = calls.len(), concurrent, "Running tool calls");

        let result = if concurrent {
            self.run_concurrent(calls).await
        } else {
            self.run_sequential(calls).await
        };
        if result.aborted {
            self.ctx.detach();
        }
        result
    }

    fn spawn(&self, call: CallStream) -> PendingCall {
        let call_id = call.call_id().to_string();
        let tool = call.tool().to_string();
        let dispatcher = self.dispatcher.clone();
        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move { dispatcher.dispatch(call, &ctx).await });
        PendingCall {
            call_id,
            tool,
            handle,
        }
    }

    async fn run_concurrent(&self, calls: Vec<CallStream>) -> TurnResult {
        let mut pending: FuturesUnordered<_> = calls
            .into_iter()
            .map(|call| self.spawn(call).finish(self.ctx.clone()))
            .collect();

        let mut result = TurnResult::default();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(remaining = pending.len(), "Turn aborted");
                    result.aborted = true;
                    break;
                }
                next = pending.next() => match next {
                    Some(outcome) => result.outcomes.push(outcome),
                    None => break,
                },
            }
        }
        result
    }

    async fn run_sequential(&self, calls: Vec<CallStream>) -> TurnResult {
        let mut result = TurnResult::default();
        for call in calls {
            if self.is_aborted() {
                result.aborted = true;
                break;
            }
            let pending = self.spawn(call).finish(self.ctx.clone());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Turn aborted");
                    result.aborted = true;
                    break;
                }
                outcome = pending => result.outcomes.push(outcome),
            }
        }
        result
    }
}

/// A spawned call. Dropping it does not stop the task.
struct PendingCall {
    call_id: String,
    tool: String,
    handle: JoinHandle<ToolCallOutcome>,
}

impl PendingCall {
    async fn finish(self, ctx: Arc<AgentContext>) -> ToolCallOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(tool = %self.tool, call_id = %self.call_id, error = %e, "Tool task failed");
                let err = ToolError::execution_failed(format!("tool task failed: {e}"));
                ctx.complete_tag(&self.call_id, Tag::error(&self.tool, err.kind(), &err.to_string()));
                ToolCallOutcome {
                    call_id: self.call_id,
                    tool: self.tool,
                    result: Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_wire_format() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"type": "delta", "id": "c1", "text": "{\"pa"}"#).unwrap();
        assert_eq!(
            chunk,
            StreamChunk::Delta {
                id: "c1".into(),
                text: "{\"pa".into()
            }
        );
        assert_eq!(
            serde_json::to_string(&StreamChunk::End { id: "c1".into() }).unwrap(),
            r#"{"type":"end","id":"c1"}"#
        );
    }
}
