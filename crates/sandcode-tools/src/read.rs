//! Read tool - read file contents.

use crate::context::ContentPart;
use crate::{AgentContext, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use base64::Engine;
use sandcode_util::safe_join;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

/// Maximum image size attached to the conversation (5MB).
const MAX_IMAGE_SIZE: u64 = 5 * 1024 * 1024;

/// Longest line returned before truncation.
const MAX_LINE_LENGTH: usize = 2000;

/// Read file contents with line numbers.
pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    start_line: Option<usize>,
    end_line: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn id(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        r#"Reads a file from the project.

Usage:
- The path is relative to the project root.
- Optionally pass start_line and end_line (1-based, inclusive) to read a range.
- Results are returned with line numbers starting at 1.
- Image files (png, jpg, gif, webp) are attached to the conversation."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative path of the file to read"
                },
                "start_line": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "First line to read (1-based)"
                },
                "end_line": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Last line to read (inclusive)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: ReadArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let file_path = safe_join(&ctx.root, &args.path)?;

        if let Some(media_type) = image_media_type(&file_path) {
            return read_image(&args.path, &file_path, media_type, ctx).await;
        }

        let content = match ctx.vfs.read_file(&file_path).await {
            Some(content) => content,
            None if !ctx.vfs.is_deleted(&file_path) && file_path.is_file() => {
                let size = tokio::fs::metadata(&file_path).await?.len();
                return Ok(ToolOutput::new(
                    format!("Read {}", args.path),
                    format!("[Binary file: {size} bytes]\n\nThis file is not valid UTF-8 and cannot be displayed as text."),
                )
                .with_metadata(json!({"binary": true, "size": size, "path": args.path})));
            }
            None => return Err(ToolError::file_not_found(args.path)),
        };

        let start = args.start_line.unwrap_or(1).max(1);
        let end = args.end_line.unwrap_or(usize::MAX);
        if end < start {
            return Err(ToolError::validation(format!(
                "end_line ({end}) is before start_line ({start})"
            )));
        }

        let total_lines = content.lines().count();
        let output = content
            .lines()
            .enumerate()
            .skip(start - 1)
            .take(end - start + 1)
            .map(|(i, line)| {
                if line.len() > MAX_LINE_LENGTH {
                    let cut = floor_char_boundary(line, MAX_LINE_LENGTH);
                    format!("{:5}|\t{}... [truncated]", i + 1, &line[..cut])
                } else {
                    format!("{:5}|\t{}", i + 1, line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        debug!(path = %file_path.display(), start, total_lines, "Read file");

        Ok(ToolOutput::new(format!("Read {}", args.path), output).with_metadata(json!({
            "path": args.path,
            "start_line": start,
            "total_lines": total_lines
        })))
    }
}

async fn read_image(
    display: &str,
    file_path: &Path,
    media_type: &str,
    ctx: &AgentContext,
) -> ToolResult<ToolOutput> {
    if ctx.vfs.is_deleted(file_path) || !file_path.is_file() {
        return Err(ToolError::file_not_found(display));
    }
    let size = tokio::fs::metadata(file_path).await?.len();
    if size > MAX_IMAGE_SIZE {
        return Err(ToolError::validation(format!(
            "Image too large ({size} bytes). Maximum allowed size is {MAX_IMAGE_SIZE} bytes."
        )));
    }

    let bytes = tokio::fs::read(file_path).await?;
    let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
    ctx.append_followup_content(vec![
        ContentPart::Text(format!("Image contents of {display}:")),
        ContentPart::Image {
            media_type: media_type.to_string(),
            data,
        },
    ]);

    Ok(ToolOutput::new(
        format!("Read {display}"),
        format!("Image {display} ({size} bytes) attached below."),
    )
    .with_metadata(json!({"path": display, "image": true, "size": size})))
}

fn image_media_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentEvent;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_read_with_line_numbers() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let ctx = AgentContext::builder(dir.path()).build();

        let result = ReadFileTool
            .execute(json!({"path": "a.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "    1|\tone\n    2|\ttwo\n    3|\tthree");
        assert_eq!(result.metadata["total_lines"], 3);
    }

    #[tokio::test]
    async fn test_read_line_range() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour").unwrap();
        let ctx = AgentContext::builder(dir.path()).build();

        let result = ReadFileTool
            .execute(json!({"path": "a.txt", "start_line": 2, "end_line": 3}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "    2|\ttwo\n    3|\tthree");
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let ctx = AgentContext::builder(dir.path()).build();

        let err = ReadFileTool
            .execute(json!({"path": "a.txt", "start_line": 3, "end_line": 1}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[tokio::test]
    async fn test_read_prefers_overlay_and_hides_deleted() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "disk").unwrap();
        std::fs::write(dir.path().join("b.txt"), "disk").unwrap();
        let ctx = AgentContext::builder(dir.path()).build();
        ctx.vfs.write_file("a.txt", "overlay").await;
        ctx.vfs.delete_file("b.txt").await;

        let result = ReadFileTool
            .execute(json!({"path": "a.txt"}), &ctx)
            .await
            .unwrap();
        assert!(result.output.ends_with("overlay"));

        let err = ReadFileTool
            .execute(json!({"path": "b.txt"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_read_outside_root_is_rejected() {
        let dir = tempdir().unwrap();
        let ctx = AgentContext::builder(dir.path()).build();
        let err = ReadFileTool
            .execute(json!({"path": "../../etc/passwd"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PathTraversal(_)));
    }

    #[tokio::test]
    async fn test_image_is_attached_as_followup() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = AgentContext::builder(dir.path()).events(tx).build();

        let result = ReadFileTool
            .execute(json!({"path": "logo.png"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.metadata["image"], true);

        match rx.try_recv().unwrap() {
            AgentEvent::FollowupContent(parts) => {
                assert_eq!(
                    parts[1],
                    ContentPart::Image {
                        media_type: "image/png".into(),
                        data: "iVBORw==".into()
                    }
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_binary_file_is_summarized() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();
        let ctx = AgentContext::builder(dir.path()).build();

        let result = ReadFileTool
            .execute(json!({"path": "blob.bin"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.metadata["binary"], true);
    }

    #[test]
    fn test_image_media_type() {
        assert_eq!(image_media_type(Path::new("a/B.JPG")), Some("image/jpeg"));
        assert_eq!(image_media_type(Path::new("a.ts")), None);
    }
}
