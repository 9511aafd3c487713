//! Database tools backed by the managed-database service.

use crate::tag::{str_arg, Tag};
use crate::{AgentContext, ConsentPolicy, PartialArgs, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Rows returned to the model before truncation.
const MAX_ROWS: usize = 100;

fn connection(ctx: &AgentContext) -> ToolResult<(&crate::collaborator::CollaboratorClient, &str)> {
    match (&ctx.collaborator, &ctx.database_id) {
        (Some(client), Some(id)) => Ok((client.as_ref(), id.as_str())),
        _ => Err(ToolError::execution_failed("no database is connected")),
    }
}

fn connected(ctx: &AgentContext) -> bool {
    ctx.collaborator.is_some() && ctx.database_id.is_some()
}

/// Describe the tables of the connected database.
pub struct GetDatabaseSchemaTool;

#[async_trait]
impl Tool for GetDatabaseSchemaTool {
    fn id(&self) -> &str {
        "get_database_schema"
    }

    fn description(&self) -> &str {
        "Returns the tables, columns and constraints of the project's database."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn is_enabled(&self, ctx: &AgentContext) -> bool {
        connected(ctx)
    }

    fn build_tag(&self, _args: &PartialArgs, is_complete: bool) -> Option<Tag> {
        is_complete.then(|| Tag::new(self.id()).with_complete(true))
    }

    async fn execute(&self, _args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let (client, database_id) = connection(ctx)?;
        let schema: Value = client
            .get_json(
                "schema lookup",
                &format!("databases/{database_id}/schema"),
                &ctx.request_id,
            )
            .await?;
        let tables = schema["tables"].as_array().map(Vec::len).unwrap_or(0);
        debug!(database_id, tables, "Fetched database schema");

        Ok(ToolOutput::new(
            "Database schema",
            serde_json::to_string_pretty(&schema)?,
        )
        .with_metadata(json!({ "tables": tables })))
    }
}

/// Run SQL against the connected database.
pub struct ExecuteSqlTool;

#[derive(Debug, Deserialize)]
struct SqlArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    rows_affected: Option<u64>,
}

#[async_trait]
impl Tool for ExecuteSqlTool {
    fn id(&self) -> &str {
        "execute_sql"
    }

    fn description(&self) -> &str {
        r#"Executes a SQL statement against the project's database.

- The user is asked to approve every statement before it runs.
- Returns at most 100 rows."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The SQL statement to run"
                },
                "description": {
                    "type": "string",
                    "description": "What the statement does, shown to the user"
                }
            }
        })
    }

    fn default_consent(&self) -> ConsentPolicy {
        ConsentPolicy::Ask
    }

    fn modifies_state(&self) -> bool {
        true
    }

    fn is_enabled(&self, ctx: &AgentContext) -> bool {
        connected(ctx)
    }

    fn consent_preview(&self, args: &Value) -> Option<String> {
        args["query"].as_str().map(str::to_string)
    }

    fn build_tag(&self, args: &PartialArgs, is_complete: bool) -> Option<Tag> {
        Some(
            Tag::new(self.id())
                .attr_opt("description", str_arg(args, "description"))
                .body(str_arg(args, "query").unwrap_or_default())
                .with_complete(is_complete),
        )
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: SqlArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        if args.query.trim().is_empty() {
            return Err(ToolError::validation("query must not be empty"));
        }
        let (client, database_id) = connection(ctx)?;

        let response: SqlResponse = client
            .post_json(
                "SQL execution",
                &format!("databases/{database_id}/sql"),
                &json!({ "query": args.query }),
                &ctx.request_id,
            )
            .await?;

        let total = response.rows.len();
        let shown = &response.rows[..total.min(MAX_ROWS)];
        let mut output = if total == 0 {
            match response.rows_affected {
                Some(n) => format!("Statement executed. {n} rows affected."),
                None => "Statement executed. No rows returned.".to_string(),
            }
        } else {
            serde_json::to_string_pretty(shown)?
        };
        if total > MAX_ROWS {
            output.push_str(&format!("\n... {} more rows not shown", total - MAX_ROWS));
        }
        debug!(database_id, rows = total, "Executed SQL");

        Ok(ToolOutput::new("Executed SQL", output).with_metadata(json!({
            "rows": total,
            "rows_affected": response.rows_affected
        })))
    }
}
