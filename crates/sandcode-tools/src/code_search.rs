//! Code search tool - semantic file ranking through the collaborator API.

use crate::{AgentContext, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const SERVICE: &str = "code search";
const ENDPOINT: &str = "code-search";
const DEFAULT_LIMIT: usize = 10;

/// Find the files most relevant to a natural-language query.
pub struct CodeSearchTool;

#[derive(Debug, Deserialize)]
struct CodeSearchArgs {
    query: String,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct CodeSearchRequest<'a> {
    project_id: &'a str,
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct CodeSearchResponse {
    #[serde(default)]
    files: Vec<RankedFile>,
}

#[derive(Debug, Deserialize)]
struct RankedFile {
    path: String,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl Tool for CodeSearchTool {
    fn id(&self) -> &str {
        "code_search"
    }

    fn description(&self) -> &str {
        r#"Finds the project files most relevant to a natural-language query.

Use this when you do not know where something is implemented. Prefer grep when you know the exact text to look for."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What you are looking for, in plain words"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 50,
                    "description": "Maximum number of files to return (default 10)"
                }
            }
        })
    }

    fn is_enabled(&self, ctx: &AgentContext) -> bool {
        ctx.collaborator.is_some()
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: CodeSearchArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let client = ctx
            .collaborator
            .as_ref()
            .ok_or_else(|| ToolError::execution_failed("code search is not configured"))?;

        let request = CodeSearchRequest {
            project_id: &ctx.project_id,
            query: &args.query,
            limit: args.limit.unwrap_or(DEFAULT_LIMIT),
        };
        let response: CodeSearchResponse = client
            .post_json(SERVICE, ENDPOINT, &request, &ctx.request_id)
            .await?;
        debug!(query = %args.query, results = response.files.len(), "Code search finished");

        let output = if response.files.is_empty() {
            "No relevant files found.".to_string()
        } else {
            response
                .files
                .iter()
                .map(|f| match &f.reason {
                    Some(reason) => format!("{} - {reason}", f.path),
                    None => f.path.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(
            ToolOutput::new(format!("Code search: {}", args.query), output)
                .with_metadata(json!({ "count": response.files.len() })),
        )
    }
}
