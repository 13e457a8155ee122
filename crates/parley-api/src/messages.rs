use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_gateway::Origin;
use parley_types::api::{SendMessageRequest, SendMessageResponse};
use parley_types::models::Message;
use parley_types::{Identity, MessageId, UserId};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub limit: Option<u32>,
    /// Only messages with an id below this one; pass the oldest id of the
    /// previous page to fetch further back.
    pub before: Option<i64>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let message = state
        .delivery
        .send_message(&identity, Origin::Http, req.to_user_id, &req.content)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            id: message.id,
            created_at: message.created_at,
        }),
    ))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    peer_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<ConversationQuery>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Path(peer_id) = peer_id?;
    let Query(query) = query?;
    let messages = state
        .delivery
        .conversation(
            identity.user_id,
            UserId(peer_id),
            query.limit,
            query.before.map(MessageId),
        )
        .await?;
    Ok(Json(messages))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    message_id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(message_id) = message_id?;
    state
        .delivery
        .delete_message(identity.user_id, MessageId(message_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
