//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the parley-types models so the DB layer stays independent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use parley_types::models::{Message, PushSubscription, SubscriptionKeys, User};
use parley_types::{MessageId, UserId};

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub content: String,
    pub created_at: String,
}

pub struct SubscriptionRow {
    pub endpoint: String,
    pub user_id: i64,
    pub p256dh: String,
    pub auth: String,
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            id: UserId(self.id),
            username: self.username,
        }
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let created_at = parse_timestamp(&self.created_at)
            .with_context(|| format!("corrupt created_at on message {}", self.id))?;
        Ok(Message {
            id: MessageId(self.id),
            from_user_id: UserId(self.from_user_id),
            to_user_id: UserId(self.to_user_id),
            content: self.content,
            created_at,
        })
    }
}

impl SubscriptionRow {
    pub fn into_subscription(self) -> PushSubscription {
        PushSubscription {
            endpoint: self.endpoint,
            user_id: UserId(self.user_id),
            keys: SubscriptionKeys {
                p256dh: self.p256dh,
                auth: self.auth,
            },
        }
    }
}

/// Accepts the RFC 3339 form the schema writes, and the plain
/// `datetime('now')` form in case rows were inserted by hand.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .map(|ndt| ndt.and_utc())
            .map_err(Into::into)
    })
}
