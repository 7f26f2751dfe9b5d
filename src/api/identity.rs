use axum::http::HeaderMap;

use crate::model::{EntityId, User};
use crate::store::UnitOfWork;

/// Header set by the authenticating front proxy
pub const USER_ID_HEADER: &str = "x-user-id";

/// Resolve the caller from request headers.
///
/// The proxy places the logged-in user's id in `X-User-Id`; the user is
/// then looked up through the request's unit-of-work. A missing header, a
/// malformed id or an unknown user all mean the caller is anonymous.
pub async fn resolve_caller(
    headers: &HeaderMap,
    uow: &dyn UnitOfWork,
) -> anyhow::Result<Option<User>> {
    let Some(user_id) = caller_id(headers) else {
        return Ok(None);
    };
    uow.get_user(user_id).await
}

pub fn caller_id(headers: &HeaderMap) -> Option<EntityId> {
    extract_header_value(headers, USER_ID_HEADER).and_then(|id| id.trim().parse().ok())
}

/// Extract header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}
