use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use tracing::info;

use crate::auth::{generate_session_id, hash_password, verify_password};
use crate::db::{create_session, create_user, delete_session, find_user_credentials, get_user};
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::{LoginRequest, RegisterRequest, Session, User};
use crate::AppState;

const SESSION_DAYS: i64 = 7;

fn start_session(state: &AppState, user_id: i64) -> Result<Cookie<'static>, AppError> {
    let session_id = generate_session_id();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let expires_at = now + SESSION_DAYS * 24 * 60 * 60;

    let session = Session {
        id: session_id.clone(),
        user_id,
        created_at: now,
        expires_at,
    };
    create_session(&state.db, &session)?;

    Ok(Cookie::build(("session", session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::days(SESSION_DAYS))
        .build())
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<(CookieJar, (StatusCode, Json<User>)), AppError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    if req.password.chars().count() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let password_hash = hash_password(&req.password);
    let user = create_user(&state.db, &email, &password_hash)?;
    info!(id = user.id, "Registered user");

    let cookie = start_session(&state, user.id)?;
    Ok((jar.add(cookie), (StatusCode::CREATED, Json(user))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<User>), AppError> {
    let email = req.email.trim().to_lowercase();
    let (user, password_hash) =
        find_user_credentials(&state.db, &email)?.ok_or(AppError::Unauthorized)?;

    if !verify_password(&req.password, &password_hash) {
        return Err(AppError::Unauthorized);
    }

    info!(id = user.id, "User logged in");
    let cookie = start_session(&state, user.id)?;
    Ok((jar.add(cookie), Json(user)))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, impl IntoResponse), AppError> {
    if let Some(session_cookie) = jar.get("session") {
        delete_session(&state.db, session_cookie.value())?;
    }
    info!("User logged out");

    let cookie = Cookie::build(("session", ""))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(0));

    Ok((jar.remove(cookie), Json(serde_json::json!({ "success": true }))))
}

pub async fn me(
    user: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    match get_user(&state.db, user.id)? {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::NotFound),
    }
}
