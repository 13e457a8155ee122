use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use parley_types::DeliveryError;
use parley_types::events::{ClientCommand, ServerEvent};

use crate::delivery::{DeliveryDispatcher, Origin};
use crate::registry::ConnectionId;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Drive one WebSocket from accept to close.
///
/// The connection starts unauthenticated; it only becomes addressable once
/// a `join` command with a valid token binds it to a user.
pub async fn handle_connection(socket: WebSocket, delivery: DeliveryDispatcher) {
    let (mut sender, mut receiver) = socket.split();
    let registry = delivery.registry().clone();
    let (conn_id, mut events_rx) = registry.connect().await;

    debug!("Connection {} opened", conn_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Registry events + heartbeat -> client
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize {} event: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client commands, handled in arrival order
    let delivery_recv = delivery.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&delivery_recv, conn_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "Connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            truncate(&text, 200)
                        );
                        delivery_recv
                            .registry()
                            .send_to_connection(conn_id, ServerEvent::error("Malformed command"))
                            .await;
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.leave(conn_id).await;
    info!("Connection {} closed", conn_id);
}

/// Apply one client command. Failures are reported to the connection as
/// `error` events; the connection itself stays open.
pub async fn handle_command(delivery: &DeliveryDispatcher, conn_id: ConnectionId, cmd: ClientCommand) {
    let registry = delivery.registry();

    let result = match cmd {
        ClientCommand::Join { token } => {
            // The registry answers bad tokens itself.
            let _ = registry.join(conn_id, &token).await;
            return;
        }

        ClientCommand::SendMessage {
            to_user_id,
            content,
        } => match registry.identity(conn_id).await {
            Some(identity) => delivery
                .send_message(&identity, Origin::Connection(conn_id), to_user_id, &content)
                .await
                .map(|_| ()),
            None => Err(DeliveryError::Unauthorized),
        },

        ClientCommand::DeleteMessage { message_id } => match registry.identity(conn_id).await {
            Some(identity) => delivery.delete_message(identity.user_id, message_id).await,
            None => Err(DeliveryError::Unauthorized),
        },
    };

    if let Err(e) = result {
        let message = match &e {
            DeliveryError::Unauthorized => "Join first".to_string(),
            DeliveryError::Storage(inner) => {
                error!("Command on {} failed: {:#}", conn_id, inner);
                e.public_message()
            }
            _ => e.public_message(),
        };
        registry
            .send_to_connection(conn_id, ServerEvent::error(message))
            .await;
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_auth::TokenService;
    use parley_db::Database;
    use parley_push::{PushGateway, PushOutcome, PushSender};
    use parley_types::models::PushSubscription;
    use parley_types::{MessageId, UserId};
    use tokio::sync::mpsc;

    use crate::registry::SessionRegistry;

    struct NoPush;

    #[async_trait]
    impl PushSender for NoPush {
        async fn send(&self, _: &PushSubscription, _: &[u8]) -> PushOutcome {
            PushOutcome::Delivered
        }
    }

    fn setup() -> (DeliveryDispatcher, Arc<TokenService>, UserId, UserId) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = UserId(db.create_user("alice", "h").unwrap().unwrap());
        let bob = UserId(db.create_user("bob", "h").unwrap().unwrap());
        let tokens = Arc::new(TokenService::new("connection-test"));
        let push = PushGateway::new(db.clone(), Arc::new(NoPush), "pub".into());
        let delivery = DeliveryDispatcher::new(db, SessionRegistry::new(tokens.clone()), push);
        (delivery, tokens, alice, bob)
    }

    async fn expect_error(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> String {
        match rx.recv().await {
            Some(ServerEvent::Error { message }) => message,
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn commands_before_join_are_rejected() {
        let (delivery, _, _, bob) = setup();
        let (conn, mut rx) = delivery.registry().connect().await;

        handle_command(
            &delivery,
            conn,
            ClientCommand::SendMessage {
                to_user_id: bob,
                content: "hi".into(),
            },
        )
        .await;
        assert_eq!(expect_error(&mut rx).await, "Join first");

        handle_command(
            &delivery,
            conn,
            ClientCommand::DeleteMessage {
                message_id: MessageId(1),
            },
        )
        .await;
        assert_eq!(expect_error(&mut rx).await, "Join first");
    }

    #[tokio::test]
    async fn join_then_send_echoes_and_delivers() {
        let (delivery, tokens, alice, bob) = setup();
        let registry = delivery.registry();
        let (a_conn, mut a_rx) = registry.connect().await;
        let (b_conn, mut b_rx) = registry.connect().await;

        let a_token = tokens.issue(alice, "alice").unwrap();
        let b_token = tokens.issue(bob, "bob").unwrap();
        handle_command(&delivery, a_conn, ClientCommand::Join { token: a_token }).await;
        handle_command(&delivery, b_conn, ClientCommand::Join { token: b_token }).await;
        assert!(matches!(a_rx.recv().await, Some(ServerEvent::Joined { .. })));
        assert!(matches!(b_rx.recv().await, Some(ServerEvent::Joined { .. })));

        handle_command(
            &delivery,
            a_conn,
            ClientCommand::SendMessage {
                to_user_id: bob,
                content: "hi".into(),
            },
        )
        .await;

        assert!(matches!(b_rx.recv().await, Some(ServerEvent::NewMessage { ref content, .. }) if content == "hi"));
        assert!(matches!(a_rx.recv().await, Some(ServerEvent::MessageSent { to_user_id, .. }) if to_user_id == bob));
    }

    #[tokio::test]
    async fn invalid_join_reports_error() {
        let (delivery, _, _, _) = setup();
        let (conn, mut rx) = delivery.registry().connect().await;

        handle_command(&delivery, conn, ClientCommand::Join { token: "nope".into() }).await;
        assert_eq!(expect_error(&mut rx).await, "Invalid token");
    }

    #[tokio::test]
    async fn delivery_failures_become_error_events() {
        let (delivery, tokens, alice, bob) = setup();
        let (conn, mut rx) = delivery.registry().connect().await;
        let token = tokens.issue(alice, "alice").unwrap();
        handle_command(&delivery, conn, ClientCommand::Join { token }).await;
        rx.recv().await.unwrap();

        handle_command(
            &delivery,
            conn,
            ClientCommand::SendMessage {
                to_user_id: bob,
                content: "  ".into(),
            },
        )
        .await;
        assert!(expect_error(&mut rx).await.starts_with("invalid input"));

        handle_command(
            &delivery,
            conn,
            ClientCommand::DeleteMessage {
                message_id: MessageId(999),
            },
        )
        .await;
        assert_eq!(expect_error(&mut rx).await, "message not found");
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 200), "hi");
    }
}
