use serde::Serialize;

use parley_types::UserId;
use parley_types::models::Message;

const BODY_PREVIEW_CHARS: usize = 120;
const ICON: &str = "/icon-192.svg";

/// Notification shown by the service worker. Fixed shape; the worker
/// reads `title`, `body`, `icon`, `tag` and uses `data.url` on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub tag: String,
    pub data: PushData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub from_user_id: UserId,
    pub username: String,
    pub url: String,
}

impl PushPayload {
    pub fn for_message(message: &Message, from_username: &str) -> Self {
        Self {
            title: from_username.to_string(),
            body: preview(&message.content),
            icon: ICON.to_string(),
            // One notification per conversation; newer ones replace older.
            tag: format!("message-{}", message.from_user_id),
            data: PushData {
                from_user_id: message.from_user_id,
                username: from_username.to_string(),
                url: "/".to_string(),
            },
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(BODY_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
