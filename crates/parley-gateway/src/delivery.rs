use std::sync::Arc;

use tracing::{debug, info};

use parley_db::Database;
use parley_push::{PushGateway, PushPayload};
use parley_types::events::ServerEvent;
use parley_types::models::Message;
use parley_types::{DeliveryError, Identity, MessageId, UserId};

use crate::registry::{ConnectionId, SessionRegistry};

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const MAX_PAGE: u32 = 200;

/// Where a send came from. Live connections get a `message-sent` echo;
/// HTTP callers already have the persisted message in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Connection(ConnectionId),
    Http,
}

/// Persists messages and fans them out over the live and push paths.
///
/// Persistence is the only step whose failure reaches the caller. Once a
/// row exists, live delivery and push are best effort and pull is the
/// source of truth.
#[derive(Clone)]
pub struct DeliveryDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,
    registry: SessionRegistry,
    push: PushGateway,
}

impl DeliveryDispatcher {
    pub fn new(db: Arc<Database>, registry: SessionRegistry, push: PushGateway) -> Self {
        Self {
            inner: Arc::new(DispatcherInner { db, registry, push }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn push(&self) -> &PushGateway {
        &self.inner.push
    }

    pub async fn send_message(
        &self,
        sender: &Identity,
        origin: Origin,
        to_user_id: UserId,
        content: &str,
    ) -> Result<Message, DeliveryError> {
        if content.trim().is_empty() {
            return Err(DeliveryError::invalid("message content is required"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(DeliveryError::invalid(format!(
                "message content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }

        let from = sender.user_id;
        let body = content.to_string();
        let row = self
            .inner
            .db
            .call(move |db| {
                if db.get_user_by_id(to_user_id.0)?.is_none() {
                    return Ok(None);
                }
                db.insert_message(from.0, to_user_id.0, &body).map(Some)
            })
            .await?
            .ok_or(DeliveryError::NotFound("recipient"))?;
        let message = row.into_message()?;

        debug!(
            "Message {} persisted: {} -> {}",
            message.id, message.from_user_id, message.to_user_id
        );

        let live = self
            .inner
            .registry
            .deliver_to_user(to_user_id, ServerEvent::new_message(&message, &sender.username))
            .await;

        // Pushed regardless of live sessions.
        let push = self.inner.push.clone();
        let payload = PushPayload::for_message(&message, &sender.username);
        tokio::spawn(async move {
            push.send_to_user(to_user_id, &payload).await;
        });

        if let Origin::Connection(conn_id) = origin {
            self.inner
                .registry
                .send_to_connection(conn_id, ServerEvent::message_sent(&message))
                .await;
        }

        info!(
            "{} ({}) sent message {} to {} ({} live sessions)",
            sender.username, sender.user_id, message.id, to_user_id, live
        );
        Ok(message)
    }

    /// Hard delete, sender only. Both participants' live sessions are told.
    pub async fn delete_message(
        &self,
        actor: UserId,
        message_id: MessageId,
    ) -> Result<(), DeliveryError> {
        let message = self
            .inner
            .db
            .call(move |db| db.get_message(message_id.0))
            .await?
            .ok_or(DeliveryError::NotFound("message"))?
            .into_message()?;

        if message.from_user_id != actor {
            return Err(DeliveryError::Forbidden);
        }

        let removed = self
            .inner
            .db
            .call(move |db| db.delete_message(message_id.0))
            .await?;
        // A concurrent delete won the race and already notified everyone.
        if !removed {
            return Err(DeliveryError::NotFound("message"));
        }

        let event = ServerEvent::MessageDeleted {
            message_id,
            from_user_id: message.from_user_id,
            to_user_id: message.to_user_id,
        };
        let registry = &self.inner.registry;
        registry.deliver_to_user(message.from_user_id, event.clone()).await;
        if message.to_user_id != message.from_user_id {
            registry.deliver_to_user(message.to_user_id, event).await;
        }

        info!("User {} deleted message {}", actor, message_id);
        Ok(())
    }

    /// Pull path: the conversation between `user_id` and `peer_id`,
    /// oldest first by id. Without `limit` the whole history is returned;
    /// an explicit `limit` is capped at `MAX_PAGE`.
    pub async fn conversation(
        &self,
        user_id: UserId,
        peer_id: UserId,
        limit: Option<u32>,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>, DeliveryError> {
        let limit = limit.map(|n| n.clamp(1, MAX_PAGE));
        let rows = self
            .inner
            .db
            .call(move |db| db.get_conversation(user_id.0, peer_id.0, limit, before.map(|id| id.0)))
            .await?;

        rows.into_iter()
            .map(|row| row.into_message().map_err(DeliveryError::from))
            .collect()
    }
}
