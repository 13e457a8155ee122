//! Web Push delivery: VAPID identification, RFC 8291 payload encryption,
//! the HTTP sender, and the gateway that fans out to a user's devices and
//! prunes endpoints the push service reports as gone.

pub mod encrypt;
pub mod gateway;
pub mod payload;
pub mod sender;
pub mod vapid;

pub use gateway::{PushGateway, PushReport};
pub use payload::PushPayload;
pub use sender::{PushOutcome, PushSender, WebPushSender};
pub use vapid::VapidKey;
