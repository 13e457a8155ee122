use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};

use parley_types::Identity;
use parley_types::api::{PublicKeyResponse, SubscribeRequest, UnsubscribeRequest};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn public_key(State(state): State<AppState>) -> Json<PublicKeyResponse> {
    Json(PublicKeyResponse {
        public_key: state.push().public_key().to_string(),
    })
}

pub async fn subscribe(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload?;
    state
        .push()
        .subscribe(identity.user_id, req.subscription)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload?;
    if req.endpoint.trim().is_empty() {
        return Err(ApiError::invalid("endpoint is required"));
    }
    state.push().unsubscribe(req.endpoint.trim()).await?;
    Ok(StatusCode::OK)
}
