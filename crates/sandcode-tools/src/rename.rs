//! Rename tool - move a file within the project.

use crate::tag::{str_arg, Tag};
use crate::{AgentContext, PartialArgs, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use sandcode_util::safe_join;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Rename or move a file.
pub struct RenameFileTool;

#[derive(Debug, Deserialize)]
struct RenameArgs {
    from: String,
    to: String,
    #[serde(default)]
    overwrite: bool,
}

#[async_trait]
impl Tool for RenameFileTool {
    fn id(&self) -> &str {
        "rename_file"
    }

    fn description(&self) -> &str {
        r#"Renames or moves a file within the project.

- Both paths are relative to the project root.
- Parent directories of the destination are created as needed.
- Fails if the destination exists unless overwrite is true."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["from", "to"],
            "properties": {
                "from": {
                    "type": "string",
                    "description": "Current project-relative path"
                },
                "to": {
                    "type": "string",
                    "description": "New project-relative path"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace an existing destination (default false)"
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
                .attr_opt("from", str_arg(args, "from"))
                .attr_opt("to", str_arg(args, "to"))
                .with_complete(is_complete),
        )
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: RenameArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;

        // Both sides are checked before anything moves.
        let from = safe_join(&ctx.root, &args.from)?;
        let to = safe_join(&ctx.root, &args.to)?;

        if !ctx.vfs.file_exists(&from).await {
            return Err(ToolError::file_not_found(args.from));
        }
        if !args.overwrite && ctx.vfs.file_exists(&to).await {
            return Err(ToolError::execution_failed(format!(
                "{} already exists. Pass overwrite to replace it.",
                args.to
            )));
        }

        ctx.vfs.rename_file(&from, &to).await;

        if tokio::fs::try_exists(&from).await.unwrap_or(false) {
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&from, &to).await?;
        } else if let Some(content) = ctx.vfs.read_file(&to).await {
            // Only the overlay knows this file; materialize it at the new path.
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&to, content).await?;
        }
        debug!(from = %from.display(), to = %to.display(), "Renamed path");

        ctx.note_path_changed(&from);
        ctx.note_path_changed(&to);

        Ok(ToolOutput::new(
            format!("Renamed {}", args.from),
            format!("Renamed {} to {}", args.from, args.to),
        )
        .with_metadata(json!({ "from": args.from, "to": args.to })))
    }
}
