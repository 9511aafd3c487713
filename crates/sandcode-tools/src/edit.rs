//! Edit tool - perform exact string replacements in files.
//!
//! Matching is exact first. When that fails, two fallbacks are tried:
//! - line endings: a `\n` search string is retried as `\r\n` (and back)
//! - trailing whitespace: lines are compared after trimming their ends
//!
//! The file is written through a temp file and rename, and the new content
//! is recorded in the overlay.

use crate::tag::{str_arg, Tag};
use crate::{AgentContext, PartialArgs, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use sandcode_util::safe_join;
use serde::Deserialize;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Edit tool for string replacement.
pub struct EditFileTool;

#[derive(Debug, Deserialize)]
struct EditArgs {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl Tool for EditFileTool {
    fn id(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        r#"Performs exact string replacements in a project file.

Usage:
- The edit will FAIL if `old_string` is not found in the file.
- The edit will FAIL if `old_string` is found multiple times (unless replace_all is true).
- Use `replace_all` for replacing all occurrences.
- Preserve exact indentation from the original file."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "old_string", "new_string"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative path of the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "The text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The text to replace it with"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default false)"
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
        let replace_all = args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .filter(|&all| all)
            .map(|_| "true");
        Some(
            Tag::new(self.id())
                .attr_opt("path", str_arg(args, "path"))
                .attr_opt("description", str_arg(args, "description"))
                .attr_opt("replace_all", replace_all)
                .body(str_arg(args, "new_string").unwrap_or_default())
                .with_complete(is_complete),
        )
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: EditArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;

        if args.old_string.is_empty() {
            return Err(ToolError::validation("old_string must not be empty"));
        }
        if args.old_string == args.new_string {
            return Err(ToolError::validation(
                "old_string and new_string must be different",
            ));
        }

        let file_path = safe_join(&ctx.root, &args.path)?;
        let content = ctx
            .vfs
            .read_file(&file_path)
            .await
            .ok_or_else(|| ToolError::file_not_found(args.path.clone()))?;

        let (old, new) = resolve_search(&content, &args.old_string, &args.new_string).ok_or_else(|| {
            ToolError::execution_failed(format!("old_string not found in {}", args.path))
        })?;

        let count = content.matches(old.as_str()).count();
        let new_content = if count == 1 {
            content.replacen(old.as_str(), &new, 1)
        } else if args.replace_all {
            content.replace(old.as_str(), &new)
        } else {
            return Err(ToolError::execution_failed(format!(
                "old_string found {count} times. Use replace_all to replace all occurrences, or provide more context to make the match unique."
            )));
        };

        write_atomic(&file_path, &new_content).await?;
        debug!(path = %file_path.display(), replaced = count, "Edited file");
        ctx.vfs.write_file(&file_path, new_content.as_str()).await;
        ctx.note_path_changed(&file_path);

        let diff = generate_diff(&content, &new_content, Path::new(&args.path));
        let old_lines = old.lines().count();
        let new_lines = new.lines().count();

        Ok(ToolOutput::new(format!("Edited {}", args.path), diff).with_metadata(json!({
            "path": args.path,
            "additions": new_lines.saturating_sub(old_lines),
            "deletions": old_lines.saturating_sub(new_lines),
            "replaced": if args.replace_all { count } else { 1 }
        })))
    }
}

/// Find the spelling of `old` actually present in `content`.
///
/// Returns the search and replacement strings to use, adjusted to the
/// file's line endings or trailing whitespace when needed.
fn resolve_search(content: &str, old: &str, new: &str) -> Option<(String, String)> {
    if content.contains(old) {
        return Some((old.to_string(), new.to_string()));
    }

    if content.contains("\r\n") && !old.contains("\r\n") {
        let crlf_old = old.replace('\n', "\r\n");
        if content.contains(&crlf_old) {
            return Some((crlf_old, new.replace('\n', "\r\n")));
        }
    }
    if old.contains("\r\n") {
        let lf_old = old.replace("\r\n", "\n");
        if content.contains(&lf_old) {
            return Some((lf_old, new.replace("\r\n", "\n")));
        }
    }

    find_trimmed_block(content, old).map(|block| (block, new.to_string()))
}

/// Locate a block of lines equal to `target` after trimming line ends.
///
/// Only a unique match counts.
fn find_trimmed_block(content: &str, target: &str) -> Option<String> {
    let target_lines: Vec<&str> = target.lines().map(str::trim_end).collect();
    if target_lines.is_empty() || target_lines.iter().all(|l| l.is_empty()) {
        return None;
    }
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    if lines.len() < target_lines.len() {
        return None;
    }

    let mut found = None;
    for start in 0..=(lines.len() - target_lines.len()) {
        let window = &lines[start..start + target_lines.len()];
        let matches = window
            .iter()
            .zip(&target_lines)
            .all(|(line, target)| line.trim_end() == *target);
        if matches {
            if found.is_some() {
                return None;
            }
            let mut block: String = window.concat();
            if !target.ends_with('\n') {
                let trimmed = block.trim_end_matches(['\r', '\n']).len();
                block.truncate(trimmed);
            }
            found = Some(block);
        }
    }
    found
}

/// Write through a sibling temp file and rename.
async fn write_atomic(path: &Path, content: &str) -> ToolResult<()> {
    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        sandcode_util::Identifier::call()
    );
    let temp_path = path
        .parent()
        .map(|p| p.join(&temp_name))
        .unwrap_or_else(|| PathBuf::from(&temp_name));

    fs::write(&temp_path, content)
        .await
        .map_err(|e| ToolError::execution_failed(format!("Failed to write temp file: {e}")))?;

    let rename_result = fs::rename(&temp_path, path).await;
    if rename_result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    rename_result.map_err(|e| ToolError::execution_failed(format!("Failed to rename file: {e}")))
}

/// Generate a unified diff.
pub(crate) fn generate_diff(old: &str, new: &str, path: &Path) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    output.push_str(&format!("--- a/{}\n", path.display()));
    output.push_str(&format!("+++ b/{}\n", path.display()));

    for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
        if idx > 0 {
            output.push_str("...\n");
        }

        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };

                output.push_str(sign);
                output.push_str(change.value());
                if !change.value().ends_with('\n') {
                    output.push('\n');
                }
            }
        }
    }

    output
}
