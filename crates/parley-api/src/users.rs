use axum::{Extension, Json, extract::State};

use parley_types::Identity;
use parley_types::models::User;

use crate::error::ApiError;
use crate::state::AppState;

/// Everyone the caller can message, by username.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<User>>, ApiError> {
    let me = identity.user_id.0;
    let users = state
        .db
        .call(move |db| db.list_users_except(me))
        .await?
        .into_iter()
        .map(|row| row.into_user())
        .collect();
    Ok(Json(users))
}
