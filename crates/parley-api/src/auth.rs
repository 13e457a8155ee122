use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use parley_auth::password::{self, PASSWORD_MIN, USERNAME_MAX, USERNAME_MIN};
use parley_auth::TokenError;
use parley_types::UserId;
use parley_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    if !password::valid_username(&req.username) {
        return Err(ApiError::invalid(format!(
            "username must be {USERNAME_MIN}-{USERNAME_MAX} characters of letters, digits, '_' or '-'"
        )));
    }
    if req.password.chars().count() < PASSWORD_MIN {
        return Err(ApiError::invalid(format!(
            "password must be at least {PASSWORD_MIN} characters"
        )));
    }

    // Hashing runs on the blocking pool together with the insert.
    let username = req.username.clone();
    let user_id = state
        .db
        .call(move |db| {
            let hash = password::hash_password(&req.password)?;
            db.create_user(&req.username, &hash)
        })
        .await?
        .map(UserId)
        .ok_or(ApiError::UsernameTaken)?;

    let token = issue(&state, user_id, &username)?;
    info!("Registered {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let user = state
        .db
        .call(move |db| {
            let user = db.get_user_by_username(&req.username)?;
            Ok(user.filter(|u| password::verify_password(&req.password, &u.password_hash)))
        })
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let user_id = UserId(user.id);
    let token = issue(&state, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        token,
        user_id,
        username: user.username,
    }))
}

fn issue(state: &AppState, user_id: UserId, username: &str) -> Result<String, ApiError> {
    state
        .tokens
        .issue(user_id, username)
        .map_err(|e: TokenError| ApiError::from(anyhow::Error::new(e)))
}
