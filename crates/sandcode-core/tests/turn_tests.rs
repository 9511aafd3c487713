//! Turn orchestration integration tests.
//!
//! These drive streamed tool calls through a `Turn` against real and
//! test-only tools.

use async_trait::async_trait;
use sandcode_core::{Config, Instance, StreamChunk, Turn};
use sandcode_tools::consent::{AutoApprove, ConsentGate};
use sandcode_tools::{
    AgentContext, AgentEvent, Dispatcher, Tool, ToolMode, ToolOutput, ToolRegistry, ToolResult,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Sleeps, then records its name. Tracks how many instances run at once.
struct Sleeper {
    name: &'static str,
    delay: Duration,
    mutating: bool,
    log: Arc<Mutex<Vec<&'static str>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    marker: Option<PathBuf>,
}

#[async_trait]
impl Tool for Sleeper {
    fn id(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn modifies_state(&self) -> bool {
        self.mutating
    }

    async fn execute(&self, _args: Value, _ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(self.name);
        if let Some(marker) = &self.marker {
            std::fs::write(marker, self.name)?;
        }
        Ok(ToolOutput::new(self.name, format!("{} done", self.name)))
    }
}

struct Harness {
    log: Arc<Mutex<Vec<&'static str>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    registry: ToolRegistry,
}

impl Harness {
    fn new() -> Self {
        Self {
            log: Arc::default(),
            active: Arc::default(),
            peak: Arc::default(),
            registry: ToolRegistry::new(),
        }
    }

    fn tool(&mut self, name: &'static str, delay_ms: u64, mutating: bool, marker: Option<PathBuf>) {
        self.registry
            .register(Arc::new(Sleeper {
                name,
                delay: Duration::from_millis(delay_ms),
                mutating,
                log: self.log.clone(),
                active: self.active.clone(),
                peak: self.peak.clone(),
                marker,
            }))
            .unwrap();
    }

    fn turn(self, root: &std::path::Path) -> (Turn, mpsc::UnboundedReceiver<AgentEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = AgentContext::builder(root).events(tx).build();
        let dispatcher = Dispatcher::new(
            Arc::new(self.registry),
            ConsentGate::new(Vec::new()),
            ToolMode::ReadWrite,
        );
        let rest = Harness {
            log: self.log,
            active: self.active,
            peak: self.peak,
            registry: ToolRegistry::new(),
        };
        (Turn::new(Arc::new(dispatcher), Arc::new(ctx)), rx, rest)
    }
}

fn call(turn: &mut Turn, id: &str, name: &str, args: &str) {
    turn.push(StreamChunk::Start {
        id: id.into(),
        name: name.into(),
    });
    turn.push(StreamChunk::Delta {
        id: id.into(),
        text: args.into(),
    });
    turn.push(StreamChunk::End { id: id.into() });
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_streamed_write_previews_then_completes() {
    let dir = TempDir::new().unwrap();
    let instance = Instance::from_config(dir.path(), Config::default(), Vec::new()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(instance.context(Some(tx), Arc::new(AutoApprove)));
    let mut turn = Turn::new(instance.dispatcher(), ctx.clone());

    turn.push(StreamChunk::Start {
        id: "call_1".into(),
        name: "write_file".into(),
    });
    for fragment in [r#"{"path": "a.t"#, r#"xt", "content": "hel"#, r#"lo"}"#] {
        turn.push(StreamChunk::Delta {
            id: "call_1".into(),
            text: fragment.into(),
        });
    }
    turn.push(StreamChunk::End {
        id: "call_1".into(),
    });
    assert_eq!(turn.pending(), 1);

    let result = turn.run().await;
    assert!(!result.aborted);
    assert_eq!(result.outcomes.len(), 1);
    assert!(!result.outcomes[0].is_error());
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello");

    let events = drain(&mut rx);
    let (previews, finals): (Vec<_>, Vec<_>) = events
        .iter()
        .partition(|e| matches!(e, AgentEvent::StreamTag { .. }));
    assert_eq!(previews.len(), 3);
    assert_eq!(finals.len(), 1);
    match events.last().unwrap() {
        AgentEvent::CompleteTag { call_id, tag } => {
            assert_eq!(call_id, "call_1");
            assert_eq!(
                tag.to_wire(),
                "<sandcode-write-file path=\"a.txt\">hello</sandcode-write-file>"
            );
        }
        other => panic!("unexpected final event: {other:?}"),
    }

    instance.finish_turn(&ctx);
    assert_eq!(instance.vfs().read_file("a.txt").await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_read_only_batch_runs_concurrently_in_completion_order() {
    let dir = TempDir::new().unwrap();
    let mut harness = Harness::new();
    harness.tool("slow", 300, false, None);
    harness.tool("fast", 10, false, None);
    let (mut turn, _rx, harness) = harness.turn(dir.path());

    call(&mut turn, "c1", "slow", "{}");
    call(&mut turn, "c2", "fast", "{}");
    let result = turn.run().await;

    let order: Vec<&str> = result.outcomes.iter().map(|o| o.tool.as_str()).collect();
    assert_eq!(order, vec!["fast", "slow"]);
    assert_eq!(harness.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_mutating_batch_runs_in_call_order() {
    let dir = TempDir::new().unwrap();
    let mut harness = Harness::new();
    harness.tool("slow_write", 200, true, None);
    harness.tool("fast", 10, false, None);
    let (mut turn, _rx, harness) = harness.turn(dir.path());

    call(&mut turn, "c1", "slow_write", "{}");
    call(&mut turn, "c2", "fast", "{}");
    let result = turn.run().await;

    let order: Vec<&str> = result.outcomes.iter().map(|o| o.tool.as_str()).collect();
    assert_eq!(order, vec!["slow_write", "fast"]);
    assert_eq!(*harness.log.lock().unwrap(), vec!["slow_write", "fast"]);
    assert_eq!(harness.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_abort_detaches_running_calls() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("finished.txt");
    let mut harness = Harness::new();
    harness.tool("slow", 300, false, Some(marker.clone()));
    let (mut turn, mut rx, _harness) = harness.turn(dir.path());

    call(&mut turn, "c1", "slow", "{}");
    drain(&mut rx);

    let token = turn.cancel_token();
    let running = tokio::spawn(async move {
        let result = turn.run().await;
        (turn, result)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let (turn, result) = running.await.unwrap();
    assert!(result.aborted);
    assert!(result.outcomes.is_empty());
    assert!(turn.context().is_detached());

    // The call keeps running and finishes its side effect.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(marker.exists());
    // Its final tag was discarded.
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_unknown_and_unterminated_calls_get_error_tags() {
    let dir = TempDir::new().unwrap();
    let instance = Instance::from_config(dir.path(), Config::default(), Vec::new()).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(instance.context(Some(tx), Arc::new(AutoApprove)));
    let mut turn = Turn::new(instance.dispatcher(), ctx);

    call(&mut turn, "c1", "launch_rockets", "{}");
    turn.push(StreamChunk::Start {
        id: "c2".into(),
        name: "read_file".into(),
    });
    turn.push(StreamChunk::Delta {
        id: "c2".into(),
        text: r#"{"path": "a.t"#.into(),
    });

    let result = turn.run().await;
    assert_eq!(result.outcomes.len(), 2);
    assert!(result.outcomes.iter().all(|o| o.is_error()));

    let texts = result.model_results();
    let unknown = texts.iter().find(|(id, _)| id == "c1").unwrap();
    assert!(unknown.1.contains("Unknown tool"));

    let finals: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::CompleteTag { tag, .. } => Some(tag),
            _ => None,
        })
        .collect();
    assert_eq!(finals.len(), 2);
    for tag in finals {
        assert!(tag.is_complete());
        assert!(tag.to_wire().starts_with("<sandcode-error"));
        assert!(tag.to_wire().ends_with("</sandcode-error>"));
    }
}

#[tokio::test]
async fn test_stray_chunks_are_ignored() {
    let dir = TempDir::new().unwrap();
    let mut harness = Harness::new();
    harness.tool("fast", 1, false, None);
    let (mut turn, _rx, _harness) = harness.turn(dir.path());

    turn.push(StreamChunk::Delta {
        id: "ghost".into(),
        text: "{}".into(),
    });
    turn.push(StreamChunk::End { id: "ghost".into() });
    call(&mut turn, "c1", "fast", "{}");
    turn.push(StreamChunk::Start {
        id: "c1".into(),
        name: "fast".into(),
    });
    assert_eq!(turn.pending(), 1);

    let result = turn.run().await;
    assert_eq!(result.outcomes.len(), 1);
    assert_eq!(turn.pending(), 0);
}

#[tokio::test]
async fn test_declined_consent_leaves_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let config = Config::parse_jsonc(
        r#"{"permission": [{"tool": "delete_file", "decision": "deny"}]}"#,
        "test",
    )
    .unwrap();
    std::fs::write(dir.path().join("keep.txt"), "x").unwrap();
    let instance = Instance::from_config(dir.path(), config, Vec::new()).unwrap();
    let ctx = Arc::new(instance.context(None, Arc::new(AutoApprove)));
    let mut turn = Turn::new(instance.dispatcher(), ctx);

    call(&mut turn, "c1", "delete_file", r#"{"path": "keep.txt"}"#);
    let result = turn.run().await;

    let outcome = &result.outcomes[0];
    assert_eq!(outcome.result.as_ref().unwrap_err().kind(), "consent_denied");
    assert!(dir.path().join("keep.txt").exists());
}
