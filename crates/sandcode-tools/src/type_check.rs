//! Type check tool - run the project's configured type checker.
//!
//! A non-zero exit with diagnostics is still a successful call: the
//! diagnostics are the result the model needs to see.

use crate::{AgentContext, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Maximum output returned to the model.
const MAX_OUTPUT_SIZE: usize = 30_000;

/// Run the configured type checker in the project root.
pub struct RunTypeChecksTool;

#[async_trait]
impl Tool for RunTypeChecksTool {
    fn id(&self) -> &str {
        "run_type_checks"
    }

    fn description(&self) -> &str {
        r#"Runs the project's type checker and returns its diagnostics.

Run this after a set of edits to confirm the project still type checks."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn is_enabled(&self, ctx: &AgentContext) -> bool {
        ctx.type_check
            .as_ref()
            .is_some_and(|settings| !settings.command.is_empty())
    }

    async fn execute(&self, _args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let settings = ctx
            .type_check
            .as_ref()
            .ok_or_else(|| ToolError::execution_failed("no type checker is configured"))?;
        let (program, rest) = settings
            .command
            .split_first()
            .ok_or_else(|| ToolError::execution_failed("type check command is empty"))?;

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(&ctx.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("NO_COLOR", "1")
            .env("FORCE_COLOR", "0");

        debug!(command = ?settings.command, "Running type checker");
        let child = cmd.spawn().map_err(|e| {
            ToolError::external("type checker", None, format!("failed to start {program}: {e}"))
        })?;

        let output = tokio::time::timeout(settings.timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout(settings.timeout))??;

        let exit_code = output.status.code().unwrap_or(-1);
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        let truncated = text.len() > MAX_OUTPUT_SIZE;
        if truncated {
            let mut cut = MAX_OUTPUT_SIZE;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n... [output truncated]");
        }

        let passed = output.status.success();
        info!(exit_code, passed, "Type check finished");

        let body = if passed && text.trim().is_empty() {
            "Type check passed with no diagnostics.".to_string()
        } else if passed {
            format!("Type check passed.\n\n{text}")
        } else {
            format!("Type check reported problems (exit code {exit_code}):\n\n{text}")
        };

        Ok(ToolOutput::new(
            if passed { "Type check passed" } else { "Type check failed" },
            body,
        )
        .with_metadata(json!({
            "exit_code": exit_code,
            "passed": passed,
            "truncated": truncated
        })))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::TypeCheckSettings;
    use std::time::Duration;
    use tempfile::tempdir;

    fn ctx_with(dir: &std::path::Path, command: &[&str], timeout: Duration) -> AgentContext {
        AgentContext::builder(dir)
            .type_check(TypeCheckSettings {
                command: command.iter().map(|s| s.to_string()).collect(),
                timeout,
            })
            .build()
    }

    #[test]
    fn test_disabled_without_command() {
        let ctx = AgentContext::builder("/tmp/project").build();
        assert!(!RunTypeChecksTool.is_enabled(&ctx));
        let ctx = ctx_with(std::path::Path::new("/tmp/project"), &[], Duration::from_secs(1));
        assert!(!RunTypeChecksTool.is_enabled(&ctx));
    }

    #[tokio::test]
    async fn test_diagnostics_are_a_successful_result() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with(
            dir.path(),
            &["sh", "-c", "echo 'src/a.ts(1,7): error TS2322'; exit 2"],
            Duration::from_secs(10),
        );

        let result = RunTypeChecksTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(result.metadata["passed"], false);
        assert_eq!(result.metadata["exit_code"], 2);
        assert!(result.output.contains("error TS2322"));
    }

    #[tokio::test]
    async fn test_runs_in_project_root() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();
        let ctx = ctx_with(dir.path(), &["ls"], Duration::from_secs(10));

        let result = RunTypeChecksTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(result.metadata["passed"], true);
        assert!(result.output.contains("marker"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with(dir.path(), &["sleep", "5"], Duration::from_millis(100));

        let err = RunTypeChecksTool.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempdir().unwrap();
        let ctx = ctx_with(dir.path(), &["/nonexistent/tsc"], Duration::from_secs(1));

        let err = RunTypeChecksTool.execute(json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.kind(), "external_service_failure");
    }
}
