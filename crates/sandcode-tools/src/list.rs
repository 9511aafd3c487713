//! List tool - directory listing with tree structure.
//!
//! The walk respects `.gitignore`. Files written during the conversation
//! are merged in and files deleted during the conversation are hidden.

use crate::{AgentContext, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use sandcode_util::path::relative_to_root;
use sandcode_util::safe_join;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Directories never listed, even without a `.gitignore`.
const IGNORE_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "target",
    ".next",
    ".turbo",
    ".cache",
    "coverage",
];

/// Maximum number of files to list.
const LIMIT: usize = 500;

/// List files and directories in a tree structure.
pub struct ListFilesTool;

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default = "default_path")]
    path: String,
}

fn default_path() -> String {
    ".".to_string()
}

#[async_trait]
impl Tool for ListFilesTool {
    fn id(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        r#"Lists files under a project directory as a tree.

- The path is relative to the project root; omit it to list the whole project
- Respects .gitignore files
- Includes files created during this conversation"#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Project-relative directory to list (defaults to the project root)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: ListArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let search_path = safe_join(&ctx.root, &args.path)?;
        let rel_dir = relative_to_root(&ctx.root, &search_path).unwrap_or_default();

        let walk_root = search_path.clone();
        let disk_files = tokio::task::spawn_blocking(move || walk(&walk_root))
            .await
            .map_err(|e| ToolError::execution_failed(format!("Directory walk failed: {e}")))?;

        let mut files: BTreeSet<PathBuf> = disk_files
            .into_iter()
            .filter(|rel| !ctx.vfs.is_deleted(search_path.join(rel)))
            .collect();
        for file in ctx.vfs.get_virtual_files() {
            if let Ok(rel) = file.path.strip_prefix(&rel_dir) {
                files.insert(rel.to_path_buf());
            }
        }

        if files.is_empty() && !search_path.is_dir() {
            return Err(ToolError::file_not_found(args.path));
        }

        let count = files.len();
        let truncated = count > LIMIT;
        let files: Vec<PathBuf> = files.into_iter().take(LIMIT).collect();

        let title = if truncated {
            format!("{} (showing {LIMIT} of {count} files)", args.path)
        } else {
            format!("{} ({count} files)", args.path)
        };

        Ok(ToolOutput::new(title, build_tree(&args.path, &files)).with_metadata(json!({
            "count": count,
            "truncated": truncated,
            "path": args.path
        })))
    }
}

/// Collect files under `dir`, relative to it.
fn walk(dir: &Path) -> Vec<PathBuf> {
    let walker = ignore::WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_some_and(|t| t.is_dir()) && IGNORE_DIRS.contains(&name.as_ref()))
        })
        .build();

    walker
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|e| e.path().strip_prefix(dir).ok().map(Path::to_path_buf))
        .collect()
}

/// Render sorted relative file paths as an indented tree.
fn build_tree(root: &str, files: &[PathBuf]) -> String {
    let mut files_by_dir: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();

    for file in files {
        let parent = file.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut current = Some(parent.as_path());
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        files_by_dir.entry(parent).or_default().push(name);
    }

    let mut output = format!("{}/\n", root.trim_end_matches('/'));
    render_dir(Path::new(""), 1, &dirs, &files_by_dir, &mut output);
    output
}

fn render_dir(
    dir: &Path,
    depth: usize,
    dirs: &BTreeSet<PathBuf>,
    files_by_dir: &BTreeMap<PathBuf, Vec<String>>,
    output: &mut String,
) {
    let indent = "  ".repeat(depth);

    for child in dirs.iter().filter(|d| d.parent() == Some(dir)) {
        if let Some(name) = child.file_name() {
            output.push_str(&format!("{indent}{}/\n", name.to_string_lossy()));
            render_dir(child, depth + 1, dirs, files_by_dir, output);
        }
    }

    if let Some(files) = files_by_dir.get(dir) {
        for file in files {
            output.push_str(&format!("{indent}{file}\n"));
        }
    }
}
