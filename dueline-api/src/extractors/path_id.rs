//! Typed todo id from the `:id` path segment.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use dueline_core::TodoId;

use crate::error::ApiError;

/// A positive todo id taken from the path.
///
/// Anything else is answered with 400 `invalid id` before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTodoId(pub TodoId);

impl PathTodoId {
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw.trim().parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(TodoId::new(id))),
            _ => Err(ApiError::invalid_input("invalid id")
                .with_details(serde_json::json!({ "id": raw }))),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for PathTodoId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw): Path<String> = Path::from_request_parts(parts, state).await?;
        Self::parse(&raw)
    }
}
