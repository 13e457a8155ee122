use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use parley_gateway::connection;

use crate::state::AppState;

/// Upgrade without authentication; the socket joins with a token afterwards.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let delivery = state.delivery.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, delivery))
}
