//! Todo tool - track the task list for the current turn.
//!
//! The list lives in the [`AgentContext`] so it survives across tool calls,
//! and every successful update is mirrored to the UI as a
//! [`TodosUpdated`](crate::AgentEvent::TodosUpdated) event.
//!
//! Updates come in two modes:
//! - replace: the incoming records become the new list; each must be complete
//! - merge: records are matched by `id` and only supplied fields change;
//!   records with an unknown `id` are appended and must be complete

use crate::tag::Tag;
use crate::{AgentContext, PartialArgs, Tool, ToolError, ToolOutput, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

/// A todo item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

impl Todo {
    pub fn new(id: impl Into<String>, content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status,
        }
    }
}

/// Todo status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Completed => "completed",
        }
    }

    /// Get display icon for the status.
    pub fn icon(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[>]",
            TodoStatus::Completed => "[x]",
        }
    }
}

/// An incoming record. Fields left out are kept from the existing item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TodoStatus>,
}

impl TodoUpdate {
    fn into_todo(self) -> Result<Todo, String> {
        match (self.content, self.status) {
            (Some(content), Some(status)) => Ok(Todo {
                id: self.id,
                content,
                status,
            }),
            _ => Err(self.id),
        }
    }
}

impl From<&Todo> for TodoUpdate {
    fn from(todo: &Todo) -> Self {
        Self {
            id: todo.id.clone(),
            content: Some(todo.content.clone()),
            status: Some(todo.status),
        }
    }
}

/// Apply `incoming` to `existing` and return the resulting list.
///
/// Order is preserved: existing items keep their position and new items are
/// appended in the order they arrive.
pub fn merge_todos(existing: &[Todo], incoming: Vec<TodoUpdate>, merge: bool) -> ToolResult<Vec<Todo>> {
    if !merge {
        let mut seen = HashSet::new();
        let mut todos = Vec::with_capacity(incoming.len());
        for update in incoming {
            if !seen.insert(update.id.clone()) {
                return Err(ToolError::validation(format!(
                    "Duplicate todo id '{}'",
                    update.id
                )));
            }
            let todo = update.into_todo().map_err(|id| {
                ToolError::validation(format!(
                    "Todo '{id}' needs both content and status when replacing the list"
                ))
            })?;
            todos.push(todo);
        }
        return Ok(todos);
    }

    let mut todos = existing.to_vec();
    for update in incoming {
        match todos.iter_mut().find(|t| t.id == update.id) {
            Some(todo) => {
                if let Some(content) = update.content {
                    todo.content = content;
                }
                if let Some(status) = update.status {
                    todo.status = status;
                }
            }
            None => {
                let todo = update.into_todo().map_err(|id| {
                    ToolError::validation(format!(
                        "Todo '{id}' does not exist yet, so it needs both content and status"
                    ))
                })?;
                todos.push(todo);
            }
        }
    }
    Ok(todos)
}

/// Count todos by status: (pending, in_progress, completed).
pub fn counts(todos: &[Todo]) -> (usize, usize, usize) {
    todos.iter().fold((0, 0, 0), |(p, i, c), t| match t.status {
        TodoStatus::Pending => (p + 1, i, c),
        TodoStatus::InProgress => (p, i + 1, c),
        TodoStatus::Completed => (p, i, c + 1),
    })
}

/// Human-readable summary: counts by status, then the outstanding items.
pub fn summarize(todos: &[Todo]) -> String {
    if todos.is_empty() {
        return "Todo list is empty.".to_string();
    }

    let (pending, in_progress, completed) = counts(todos);
    let mut output = format!(
        "{} todos: {pending} pending, {in_progress} in progress, {completed} completed",
        todos.len()
    );

    let outstanding: Vec<&Todo> = todos
        .iter()
        .filter(|t| t.status != TodoStatus::Completed)
        .collect();
    if outstanding.is_empty() {
        output.push_str("\nAll todos are completed.");
    } else {
        output.push_str("\nOutstanding:");
        for todo in outstanding {
            output.push_str(&format!(
                "\n{} {} ({})",
                todo.status.icon(),
                todo.content,
                todo.id
            ));
        }
    }
    output
}

/// `update_todos` tool.
pub struct UpdateTodosTool;

#[derive(Debug, Deserialize)]
struct UpdateTodosArgs {
    todos: Vec<TodoUpdate>,
    #[serde(default)]
    merge: bool,
}

#[async_trait]
impl Tool for UpdateTodosTool {
    fn id(&self) -> &str {
        "update_todos"
    }

    fn description(&self) -> &str {
        r#"Create and update the task list for the current piece of work.

Use this tool to:
- Break a multi-step request into concrete tasks
- Mark a task in_progress before starting it and completed when done
- Show the user how far along the work is

With merge=false the given list replaces the current one and every item needs
id, content and status. With merge=true items are matched by id and only the
supplied fields change; new ids are added and need content and status.

Keep only ONE task in_progress at a time."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["todos"],
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Todo records to apply",
                    "items": {
                        "type": "object",
                        "required": ["id"],
                        "properties": {
                            "id": {
                                "type": "string",
                                "description": "Unique identifier for the todo item"
                            },
                            "content": {
                                "type": "string",
                                "description": "Brief description of the task"
                            },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"],
                                "description": "Current status of the task"
                            }
                        }
                    }
                },
                "merge": {
                    "type": "boolean",
                    "description": "Merge into the existing list instead of replacing it",
                    "default": false
                }
            }
        })
    }

    fn build_tag(&self, args: &PartialArgs, is_complete: bool) -> Option<Tag> {
        let merge = args.get("merge").and_then(|v| v.as_bool()).unwrap_or(false);
        let lines: Vec<String> = args
            .get("todos")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let id = item.get("id")?.as_str()?;
                        let status = item
                            .get("status")
                            .and_then(|s| s.as_str())
                            .unwrap_or("");
                        let content = item.get("content").and_then(|c| c.as_str()).unwrap_or("");
                        Some(format!("{id} {status} {content}").trim_end().to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(
            Tag::new(self.id())
                .attr("merge", merge.to_string())
                .body(lines.join("\n"))
                .with_complete(is_complete),
        )
    }

    async fn execute(&self, args: Value, ctx: &AgentContext) -> ToolResult<ToolOutput> {
        let args: UpdateTodosArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;

        let todos = ctx.with_todos_mut(|current| {
            let merged = merge_todos(current, args.todos, args.merge)?;
            *current = merged.clone();
            Ok::<_, ToolError>(merged)
        })?;

        let (pending, in_progress, completed) = counts(&todos);
        debug!(
            conversation_id = %ctx.conversation_id,
            items = todos.len(),
            merge = args.merge,
            "Publishing TodosUpdated event"
        );
        ctx.publish_todos(todos.clone());

        Ok(ToolOutput::new(
            format!(
                "Todo list updated: {pending} pending, {in_progress} in progress, {completed} completed"
            ),
            summarize(&todos),
        )
        .with_metadata(json!({
            "total": todos.len(),
            "pending": pending,
            "in_progress": in_progress,
            "completed": completed
        })))
    }
}
