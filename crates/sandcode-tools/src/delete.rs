//! Delete tool - remove a file or directory.

use crate::tag::{str_arg, Tag};
use crate::{AgentContext, PartialArgs, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use sandcode_util::path::relative_to_root;
use sandcode_util::safe_join;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Delete a file or directory.
pub struct DeleteFileTool;

#[derive(Debug, Deserialize)]
struct DeleteArgs {
    path: String,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn id(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        r#"Deletes a file or directory in the project.

- The path is relative to the project root.
- Directories are removed with everything inside them."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative path to delete"
                },
                "description": {
                    "type": "string",
                    "description": "One-line reason for the deletion, shown to the user"
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
                .with_complete(is_complete),
        )
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: DeleteArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let target = safe_join(&ctx.root, &args.path)?;
        if relative_to_root(&ctx.root, &target).is_some_and(|rel| rel.as_os_str().is_empty()) {
            return Err(ToolError::validation("Refusing to delete the project root"));
        }

        let in_overlay = ctx.vfs.file_exists(&target).await;
        let is_dir = match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                tokio::fs::remove_dir_all(&target).await?;
                true
            }
            Ok(_) => {
                tokio::fs::remove_file(&target).await?;
                false
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && in_overlay => false,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::file_not_found(args.path));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %target.display(), is_dir, "Deleted path");

        ctx.vfs.delete_file(&target).await;
        ctx.note_path_changed(&target);

        let kind = if is_dir { "directory" } else { "file" };
        Ok(
            ToolOutput::new(format!("Deleted {}", args.path), format!("Deleted {kind} {}", args.path))
                .with_metadata(json!({ "path": args.path, "directory": is_dir })),
        )
    }
}
