use axum::http::{request::Parts, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::FromRequestParts, Json};
use serde_json::json;
use tracing::warn;

use crate::db::{session_user, DbPool};
use crate::error::AppError;
use crate::AppState;

/// The authenticated user behind a request, resolved from the session
/// cookie. Identity is passed explicitly into every registry and ledger
/// call; nothing downstream reads ambient session state.
pub struct CurrentUser {
    pub id: i64,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user_id) = resolve_session(parts, &state.db)? {
            return Ok(CurrentUser { id: user_id });
        }

        warn!("Unauthorized API access attempt");
        Err(AuthError::Unauthorized)
    }
}

fn resolve_session(parts: &Parts, db: &DbPool) -> Result<Option<i64>, AppError> {
    let cookies = parts
        .headers
        .get_all("cookie")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|s| {
            let mut parts = s.trim().splitn(2, '=');
            Some((parts.next()?, parts.next()?))
        });

    for (name, value) in cookies {
        if name == "session" {
            if let Some(user_id) = session_user(db, value)? {
                return Ok(Some(user_id));
            }
        }
    }
    Ok(None)
}

pub enum AuthError {
    Unauthorized,
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response(),
            AuthError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": msg })),
            )
                .into_response(),
        }
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(msg) => AuthError::Internal(msg),
            AppError::Unauthorized => AuthError::Unauthorized,
            AppError::NotFound => AuthError::Internal("Not found".to_string()),
            AppError::Validation(msg) => AuthError::Internal(msg),
        }
    }
}
