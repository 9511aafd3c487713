//! Replay a recorded tool-call stream through a turn.
//!
//! The input holds one [`StreamChunk`] per line, as JSON. Events the turn
//! produces are printed to stdout as JSON lines, followed by one `result`
//! line per call.

use anyhow::Context;
use sandcode_core::{Instance, StreamChunk, Turn, TurnResult};
use sandcode_tools::{AgentEvent, ConsentHandler, ContentPart};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Parse a chunk file. Blank lines are skipped.
pub fn parse_chunks(content: &str) -> anyhow::Result<Vec<StreamChunk>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid chunk on line {}", index + 1))
        })
        .collect()
}

pub async fn run(instance: &Instance, file: &Path, consent: Arc<dyn ConsentHandler>) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let chunks = parse_chunks(&content)?;
    info!(chunks = chunks.len(), file = %file.display(), "Replaying tool calls");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", event_json(&event));
        }
    });

    let ctx = Arc::new(instance.context(Some(tx), consent));
    let mut turn = Turn::new(instance.dispatcher(), ctx.clone());

    let token = turn.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting turn");
            token.cancel();
        }
    });

    for chunk in chunks {
        turn.push(chunk);
    }
    let result = turn.run().await;
    interrupt.abort();

    instance.finish_turn(&ctx);
    drop(turn);
    drop(ctx);
    if !result.aborted {
        let _ = printer.await;
    }

    for line in result_lines(&result) {
        println!("{line}");
    }
    if result.aborted {
        anyhow::bail!("turn aborted");
    }
    Ok(())
}

fn result_lines(result: &TurnResult) -> Vec<Value> {
    result
        .outcomes
        .iter()
        .map(|o| {
            json!({
                "type": "result",
                "call_id": o.call_id,
                "tool": o.tool,
                "is_error": o.is_error(),
                "output": o.model_text(),
            })
        })
        .collect()
}

/// JSON form of an event for line-oriented output.
pub fn event_json(event: &AgentEvent) -> Value {
    match event {
        AgentEvent::StreamTag { call_id, tag } => json!({
            "type": "stream_tag",
            "call_id": call_id,
            "tag": tag.to_wire(),
        }),
        AgentEvent::CompleteTag { call_id, tag } => json!({
            "type": "complete_tag",
            "call_id": call_id,
            "tag": tag.to_wire(),
        }),
        AgentEvent::TodosUpdated(todos) => json!({
            "type": "todos",
            "todos": todos,
        }),
        AgentEvent::FollowupContent(parts) => {
            let parts: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => json!({"type": "text", "text": text}),
                    ContentPart::Image { media_type, data } => json!({
                        "type": "image",
                        "media_type": media_type,
                        "bytes": data.len(),
                    }),
                })
                .collect();
            json!({"type": "followup", "parts": parts})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcode_tools::Tag;

    #[test]
    fn test_parse_chunks() {
        let chunks = parse_chunks(
            "{\"type\":\"start\",\"id\":\"c1\",\"name\":\"read_file\"}\n\n{\"type\":\"end\",\"id\":\"c1\"}\n",
        )
        .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], StreamChunk::End { id: "c1".into() });
    }

    #[test]
    fn test_parse_chunks_reports_line() {
        let err = parse_chunks("{\"type\":\"end\",\"id\":\"c1\"}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_event_json() {
        let event = AgentEvent::CompleteTag {
            call_id: "c1".into(),
            tag: Tag::new("read_file").attr("path", "a.ts").closed(),
        };
        assert_eq!(
            event_json(&event),
            json!({
                "type": "complete_tag",
                "call_id": "c1",
                "tag": "<sandcode-read-file path=\"a.ts\"></sandcode-read-file>"
            })
        );

        let event = AgentEvent::FollowupContent(vec![ContentPart::Image {
            media_type: "image/png".into(),
            data: "iVBORw==".into(),
        }]);
        assert_eq!(event_json(&event)["parts"][0]["bytes"], 8);
    }
}
