mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_api::rate_limit::{self, RateLimiter};
use parley_api::{AppState, AppStateInner};
use parley_auth::TokenService;
use parley_db::Database;
use parley_gateway::{DeliveryDispatcher, SessionRegistry};
use parley_push::{PushGateway, VapidKey, WebPushSender};

use crate::config::Config;

/// How often expired rate-limit windows are dropped.
const RATE_LIMIT_SWEEP_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Push identity
    let vapid = match &config.vapid_private_key {
        Some(raw) => VapidKey::from_base64(raw)?,
        None => {
            warn!("PARLEY_VAPID_PRIVATE_KEY not set, generated an ephemeral key; subscriptions will not survive a restart");
            VapidKey::generate()?
        }
    };
    let vapid = Arc::new(vapid);
    info!("VAPID public key: {}", vapid.public_key());

    let sender = WebPushSender::new(vapid.clone(), config.vapid_subject.clone(), config.push_timeout)?;
    let push = PushGateway::new(db.clone(), Arc::new(sender), vapid.public_key().to_string());

    // Shared state
    let tokens = Arc::new(TokenService::new(&config.jwt_secret));
    let registry = SessionRegistry::new(tokens.clone());
    let delivery = DeliveryDispatcher::new(db.clone(), registry, push);

    let state: AppState = Arc::new(AppStateInner {
        db,
        tokens,
        delivery,
        limiter: RateLimiter::default(),
        trust_proxy: config.trust_proxy,
    });

    tokio::spawn(rate_limit::run_sweep_loop(state.clone(), RATE_LIMIT_SWEEP_SECS));

    let app = parley_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Parley server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
