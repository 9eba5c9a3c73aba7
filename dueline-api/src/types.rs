//! Request and response bodies of the HTTP API.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use dueline_core::{NewTodo, Timestamp, Todo, TodoPatch};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

// ============================================================================
// DUE DATE PARSING
// ============================================================================

/// `due_at` text that matches none of the accepted layouts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("due_at: use a date (YYYY-MM-DD) or an RFC 3339 datetime, got {0:?}")]
pub struct DueAtError(pub String);

/// Parse a `due_at` value.
///
/// Accepts `YYYY-MM-DD` (start of that day, UTC), RFC 3339 with any
/// fractional precision, or `YYYY-MM-DDTHH:MM:SS` read as UTC. Blank text
/// means no due date.
pub fn parse_due_at(raw: &str) -> Result<Option<Timestamp>, DueAtError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Some(midnight.and_utc()));
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Some(naive.and_utc()));
    }

    Err(DueAtError(text.to_string()))
}

/// Serde adapter: `null`, a missing field and `""` all mean no due date.
fn deserialize_due_at<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        Some(raw) => parse_due_at(&raw).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

/// Body of `POST /todos`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateTodoRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_due_at")]
    pub due_at: Option<Timestamp>,
}

impl From<CreateTodoRequest> for NewTodo {
    fn from(req: CreateTodoRequest) -> Self {
        NewTodo {
            title: req.title,
            description: req.description,
            due_at: req.due_at,
        }
    }
}

/// Body of `PATCH /todos/:id`. Absent or `null` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct UpdateTodoRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_due_at")]
    pub due_at: Option<Timestamp>,
    #[serde(default)]
    pub is_done: Option<bool>,
}

impl From<UpdateTodoRequest> for TodoPatch {
    fn from(req: UpdateTodoRequest) -> Self {
        TodoPatch {
            title: req.title,
            description: req.description,
            due_at: req.due_at,
            is_done: req.is_done,
        }
    }
}

/// Query string of `GET /todos/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

// ============================================================================
// RESPONSES
// ============================================================================

/// A todo as returned to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub is_done: bool,
    pub due_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<Todo> for TodoResponse {
    fn from(todo: Todo) -> Self {
        Self {
            id: todo.id.get(),
            title: todo.title,
            description: todo.description,
            is_done: todo.is_done,
            due_at: todo.due_at,
            created_at: todo.created_at,
            updated_at: todo.updated_at,
        }
    }
}

/// Envelope for list, search and overdue results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTodosResponse {
    pub items: Vec<TodoResponse>,
}

impl From<Vec<Todo>> for ListTodosResponse {
    fn from(todos: Vec<Todo>) -> Self {
        Self {
            items: todos.into_iter().map(TodoResponse::from).collect(),
        }
    }
}
