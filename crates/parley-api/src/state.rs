use std::sync::Arc;

use parley_auth::TokenService;
use parley_db::Database;
use parley_gateway::DeliveryDispatcher;
use parley_push::PushGateway;

use crate::rate_limit::RateLimiter;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub tokens: Arc<TokenService>,
    pub delivery: DeliveryDispatcher,
    pub limiter: RateLimiter,
    /// Take the client address from `X-Forwarded-For` instead of the socket.
    pub trust_proxy: bool,
}

impl AppStateInner {
    pub fn push(&self) -> &PushGateway {
        self.delivery.push()
    }
}
