use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use parley_types::DeliveryError;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and verify the bearer token, then hand the handler an `Identity`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(DeliveryError::Unauthorized)?;

    let identity = state
        .tokens
        .verify(token)
        .map_err(DeliveryError::from)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
