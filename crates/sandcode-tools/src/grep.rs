//! Grep tool - search file contents with ripgrep.
//!
//! ripgrep runs in the project root with `--json`; its stdout is consumed
//! line by line and the process is dropped once enough matches arrived.
//! Exit code 1 means "no matches" and is not an error.

use crate::{AgentContext, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use sandcode_util::path::relative_to_root;
use sandcode_util::safe_join;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest line text kept in a result.
const MAX_LINE_LENGTH: usize = 500;

/// Search file contents using ripgrep.
pub struct GrepTool;

#[derive(Debug, Deserialize)]
struct GrepArgs {
    pattern: String,
    path: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GrepMatch {
    path: String,
    line: u64,
    text: String,
}

#[async_trait]
impl Tool for GrepTool {
    fn id(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        r#"Fast content search across the project.

- Searches file contents using regular expressions (ripgrep syntax)
- Case-insensitive unless case_sensitive is true
- Filter files with include/exclude globs (eg. "*.ts", "src/**")
- Respects .gitignore
- Returns project-relative paths with line numbers"#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Project-relative directory to search (defaults to the project root)"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Match case exactly (default false)"
                },
                "include": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Only search files matching these globs"
                },
                "exclude": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Skip files matching these globs"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: GrepArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        if args.pattern.is_empty() {
            return Err(ToolError::validation("pattern must not be empty"));
        }

        let search_path = match &args.path {
            Some(path) => Some(safe_join(&ctx.root, path)?),
            None => None,
        };

        let mut cmd = Command::new(&ctx.search.ripgrep_path);
        cmd.arg("--json").arg("--no-config");
        if !args.case_sensitive {
            cmd.arg("--ignore-case");
        }
        for glob in &args.include {
            cmd.arg("--glob").arg(glob);
        }
        for glob in &args.exclude {
            cmd.arg("--glob").arg(format!("!{glob}"));
        }
        cmd.arg("--regexp").arg(&args.pattern);
        if let Some(rel) = search_path
            .as_deref()
            .and_then(|p| relative_to_root(&ctx.root, p))
            .filter(|rel| !rel.as_os_str().is_empty())
        {
            cmd.arg(rel);
        }
        cmd.current_dir(&ctx.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(pattern = %args.pattern, path = ?args.path, "Running ripgrep");

        let mut child = cmd.spawn().map_err(|e| {
            ToolError::external(
                "ripgrep",
                None,
                format!("failed to start {}: {e}", ctx.search.ripgrep_path.display()),
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::execution_failed("ripgrep stdout unavailable"))?;
        let stderr = child.stderr.take();
        let stderr_handle = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_string(&mut buf).await.ok();
            }
            buf
        });

        let limit = ctx.search.max_results;
        let mut matches = Vec::new();
        let mut truncated = false;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let Some(found) = parse_match_line(&line) else {
                continue;
            };
            if ctx.vfs.is_deleted(ctx.root.join(&found.path)) {
                continue;
            }
            if matches.len() >= limit {
                truncated = true;
                break;
            }
            matches.push(found);
        }

        if truncated {
            // Enough results; stop the search early.
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to stop ripgrep");
            }
            let _ = child.wait().await;
        } else {
            let status = child.wait().await?;
            let stderr = stderr_handle.await.unwrap_or_default();
            match status.code() {
                Some(0) | Some(1) => {}
                code => {
                    return Err(ToolError::external(
                        "ripgrep",
                        None,
                        format!("exited with {code:?}: {}", stderr.trim()),
                    ));
                }
            }
        }

        let count = matches.len();
        let output = if matches.is_empty() {
            "No matches found.".to_string()
        } else {
            let mut out = matches
                .iter()
                .map(|m| format!("{}:{}: {}", m.path, m.line, m.text))
                .collect::<Vec<_>>()
                .join("\n");
            if truncated {
                out.push_str(&format!("\n... truncated (reached {limit} matches)"));
            }
            out
        };

        Ok(
            ToolOutput::new(format!("Grep: {} ({count} matches)", args.pattern), output)
                .with_metadata(json!({ "count": count, "truncated": truncated })),
        )
    }
}

/// Decode one `rg --json` line, keeping only `match` messages.
fn parse_match_line(line: &str) -> Option<GrepMatch> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value["type"] != "match" {
        return None;
    }
    let data = &value["data"];
    let path = data["path"]["text"].as_str()?;
    let text = data["lines"]["text"].as_str()?.trim_end_matches(['\r', '\n']);
    let text = if text.len() > MAX_LINE_LENGTH {
        let mut cut = MAX_LINE_LENGTH;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    } else {
        text.to_string()
    };
    Some(GrepMatch {
        path: path.trim_start_matches("./").to_string(),
        line: data["line_number"].as_u64()?,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SearchSettings;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn ripgrep_available() -> bool {
        std::process::Command::new("rg")
            .arg("--version")
            .output()
            .is_ok()
    }

    #[test]
    fn test_parse_match_line() {
        let line = r#"{"type":"match","data":{"path":{"text":"./src/a.ts"},"lines":{"text":"const x = 1;\n"},"line_number":3,"absolute_offset":0,"submatches":[]}}"#;
        assert_eq!(
            parse_match_line(line),
            Some(GrepMatch {
                path: "src/a.ts".into(),
                line: 3,
                text: "const x = 1;".into()
            })
        );
        assert_eq!(parse_match_line(r#"{"type":"begin","data":{}}"#), None);
        assert_eq!(parse_match_line("not json"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_failure() {
        let dir = tempdir().unwrap();
        let ctx = AgentContext::builder(dir.path())
            .search(SearchSettings {
                ripgrep_path: PathBuf::from("/nonexistent/rg"),
                max_results: 10,
            })
            .build();

        let err = GrepTool
            .execute(json!({"pattern": "x"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "external_service_failure");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_one_is_no_matches() {
        let dir = tempdir().unwrap();
        let ctx = AgentContext::builder(dir.path())
            .search(SearchSettings {
                ripgrep_path: PathBuf::from("false"),
                max_results: 10,
            })
            .build();

        let result = GrepTool
            .execute(json!({"pattern": "x"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "No matches found.");
        assert_eq!(result.metadata["count"], 0);
    }

    #[tokio::test]
    async fn test_search_with_globs_and_case() {
        if !ripgrep_available() {
            return;
        }
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.ts"), "const Foo = 1;\n").unwrap();
        std::fs::write(dir.path().join("src/b.js"), "const foo = 2;\n").unwrap();
        let ctx = AgentContext::builder(dir.path()).build();

        let result = GrepTool
            .execute(json!({"pattern": "foo", "include": ["*.ts"]}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "src/a.ts:1: const Foo = 1;");

        let result = GrepTool
            .execute(json!({"pattern": "foo", "case_sensitive": true, "exclude": ["*.js"]}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.metadata["count"], 0);
    }

    #[tokio::test]
    async fn test_results_are_capped() {
        if !ripgrep_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let content: String = (0..50).map(|i| format!("hit {i}\n")).collect();
        std::fs::write(dir.path().join("many.txt"), content).unwrap();
        let ctx = AgentContext::builder(dir.path())
            .search(SearchSettings {
                ripgrep_path: PathBuf::from("rg"),
                max_results: 5,
            })
            .build();

        let result = GrepTool
            .execute(json!({"pattern": "hit"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.metadata["count"], 5);
        assert_eq!(result.metadata["truncated"], true);
    }

    #[tokio::test]
    async fn test_path_outside_root_is_rejected() {
        let dir = tempdir().unwrap();
        let ctx = AgentContext::builder(dir.path()).build();
        let err = GrepTool
            .execute(json!({"pattern": "x", "path": "../.."}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PathTraversal(_)));
    }
}
