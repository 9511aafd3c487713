//! Write tool - write file contents.

use crate::tag::{str_arg, Tag};
use crate::{AgentContext, PartialArgs, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use sandcode_util::safe_join;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Write file contents.
pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn id(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        r#"Writes a file in the project.

Usage:
- The path is relative to the project root.
- This tool will overwrite the existing file if there is one at the provided path.
- Parent directories are created as needed.
- Prefer edit_file for small changes to existing files."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                },
                "description": {
                    "type": "string",
                    "description": "One-line summary of the change, shown to the user"
                }
            }
        })
    }

    fn modifies_state(&self) -> bool {
        true
    }

    fn build_tag(&self, args: &PartialArgs, is_complete: bool) -> Option<Tag> {
        Some(
            Tag::new(self.id())
                .attr_opt("path", str_arg(args, "path"))
                .attr_opt("description", str_arg(args, "description"))
                .body(str_arg(args, "content").unwrap_or_default())
                .with_complete(is_complete),
        )
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: WriteArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let file_path = safe_join(&ctx.root, &args.path)?;

        let existed = tokio::fs::try_exists(&file_path).await.unwrap_or(false);
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file_path, &args.content).await?;
        debug!(path = %file_path.display(), bytes = args.content.len(), existed, "Wrote file");

        ctx.vfs.write_file(&file_path, args.content.as_str()).await;
        ctx.note_path_changed(&file_path);

        let lines = args.content.lines().count();
        Ok(ToolOutput::new(
            format!("Wrote {}", args.path),
            format!(
                "Successfully {} {} ({} bytes, {lines} lines)",
                if existed { "overwrote" } else { "created" },
                args.path,
                args.content.len()
            ),
        )
        .with_metadata(json!({
            "bytes": args.content.len(),
            "path": args.path,
            "created": !existed
        })))
    }
}
