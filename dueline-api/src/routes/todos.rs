//! Todo REST handlers.
//!
//! Thin adapters from HTTP to [`TodoService`]: extract the owner and the
//! body, call the service, map the result. Every route requires the
//! `x-owner-id` header.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::error::ApiResult;
use crate::extractors::{OwnerIdentity, PathTodoId};
use crate::service::TodoService;
use crate::state::AppState;
use crate::types::{
    CreateTodoRequest, ListTodosResponse, SearchParams, TodoResponse, UpdateTodoRequest,
};

// ============================================================================
// QUERIES
// ============================================================================

/// GET /todos
pub async fn list_todos(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
) -> ApiResult<Json<ListTodosResponse>> {
    let todos = service.list(owner_id).await?;
    Ok(Json(todos.into()))
}

/// GET /todos/search?q=
pub async fn search_todos(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<ListTodosResponse>> {
    let Query(params) = params?;
    let todos = service.search(owner_id, &params.q).await?;
    Ok(Json(todos.into()))
}

/// GET /todos/overdue
pub async fn overdue_todos(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
) -> ApiResult<Json<ListTodosResponse>> {
    let todos = service.overdue(owner_id).await?;
    Ok(Json(todos.into()))
}

/// GET /todos/:id
pub async fn get_todo(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
    PathTodoId(id): PathTodoId,
) -> ApiResult<Json<TodoResponse>> {
    let todo = service.get(owner_id, id).await?;
    Ok(Json(todo.into()))
}

// ============================================================================
// COMMANDS
// ============================================================================

/// POST /todos
pub async fn create_todo(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
    body: Result<Json<CreateTodoRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;
    let todo = service.create(owner_id, req.into()).await?;
    Ok((StatusCode::CREATED, Json(TodoResponse::from(todo))))
}

/// PATCH /todos/:id
pub async fn update_todo(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
    PathTodoId(id): PathTodoId,
    body: Result<Json<UpdateTodoRequest>, JsonRejection>,
) -> ApiResult<Json<TodoResponse>> {
    let Json(req) = body?;
    let todo = service.update(owner_id, id, req.into()).await?;
    Ok(Json(todo.into()))
}

/// DELETE /todos/:id
pub async fn delete_todo(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
    PathTodoId(id): PathTodoId,
) -> ApiResult<StatusCode> {
    service.delete(owner_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /todos/:id/complete
pub async fn complete_todo(
    State(service): State<Arc<TodoService>>,
    OwnerIdentity(owner_id): OwnerIdentity,
    PathTodoId(id): PathTodoId,
) -> ApiResult<Json<TodoResponse>> {
    let todo = service.complete(owner_id, id).await?;
    Ok(Json(todo.into()))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Routes mounted under `/todos`.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_todos).post(create_todo))
        .route("/search", get(search_todos))
        .route("/overdue", get(overdue_todos))
        .route("/:id", get(get_todo).patch(update_todo).delete(delete_todo))
        .route("/:id/complete", post(complete_todo))
}
