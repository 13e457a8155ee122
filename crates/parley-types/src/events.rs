use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageId, UserId};

/// Events sent from the server over the live transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// The connection is now bound to this identity
    Joined { user_id: UserId, username: String },

    /// A message addressed to the receiving user was persisted
    NewMessage {
        id: MessageId,
        from_user_id: UserId,
        from_username: String,
        to_user_id: UserId,
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// Echo to the sending connection once its message is persisted
    MessageSent {
        id: MessageId,
        to_user_id: UserId,
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// A message in one of the user's conversations was deleted
    MessageDeleted {
        message_id: MessageId,
        from_user_id: UserId,
        to_user_id: UserId,
    },

    /// Auth or validation failure. The connection stays open.
    Error { message: String },
}

impl ServerEvent {
    pub fn new_message(message: &Message, from_username: &str) -> Self {
        Self::NewMessage {
            id: message.id,
            from_user_id: message.from_user_id,
            from_username: from_username.to_string(),
            to_user_id: message.to_user_id,
            content: message.content.clone(),
            timestamp: message.created_at,
        }
    }

    pub fn message_sent(message: &Message) -> Self {
        Self::MessageSent {
            id: message.id,
            to_user_id: message.to_user_id,
            content: message.content.clone(),
            timestamp: message.created_at,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Joined { .. } => "joined",
            Self::NewMessage { .. } => "new-message",
            Self::MessageSent { .. } => "message-sent",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over the live transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Bind the connection to the identity carried by `token`
    Join { token: String },

    SendMessage { to_user_id: UserId, content: String },

    DeleteMessage { message_id: MessageId },
}
