pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod push;
pub mod rate_limit;
pub mod state;
pub mod users;
pub mod ws;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde_json::{Value, json};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// All HTTP and WebSocket routes. Cross-cutting layers (CORS, tracing)
/// are added by the binary.
pub fn router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(from_fn_with_state(state.clone(), rate_limit::limit_auth));

    let protected_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/messages", post(messages::send_message))
        .route(
            "/messages/{id}",
            get(messages::get_conversation).delete(messages::delete_message),
        )
        .route("/push/subscribe", post(push::subscribe))
        .route("/push/unsubscribe", post(push::unsubscribe))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    let general_routes = Router::new()
        .route("/push/public-key", get(push::public_key))
        .merge(protected_routes)
        .layer(from_fn_with_state(state.clone(), rate_limit::limit_general));

    let ws_route = Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .layer(from_fn_with_state(state.clone(), rate_limit::limit_general));

    Router::new()
        .nest("/api", auth_routes.merge(general_routes))
        .merge(ws_route)
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
