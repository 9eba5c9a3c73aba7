//! Caller identity taken from the `x-owner-id` header.
//!
//! Authentication happens upstream; this service only trusts the header it
//! is handed. A missing, non-numeric or non-positive value is rejected with
//! 401 before any handler runs.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use dueline_core::OwnerId;

use crate::error::ApiError;

/// Header carrying the authenticated owner id.
pub const OWNER_HEADER: &str = "x-owner-id";

/// The owner every todo operation of the request is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerIdentity(pub OwnerId);

impl OwnerIdentity {
    /// Parse a raw header value. Only positive integers are owners.
    pub fn parse(raw: &str) -> Result<Self, ApiError> {
        match raw.trim().parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(OwnerId::new(id))),
            _ => Err(ApiError::unauthorized(format!(
                "{} must be a positive integer",
                OWNER_HEADER
            ))),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OwnerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| ApiError::unauthorized(format!("Missing {} header", OWNER_HEADER)))?;
        let raw = value
            .to_str()
            .map_err(|_| ApiError::unauthorized(format!("{} is not valid text", OWNER_HEADER)))?;
        Self::parse(raw)
    }
}

impl std::ops::Deref for OwnerIdentity {
    type Target = OwnerId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
