use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use tracing::debug;

use parley_types::models::PushSubscription;

use crate::encrypt::{self, ClientKeys, EncryptError};
use crate::vapid::{VapidError, VapidKey};

/// How long a push service should hold an undelivered notification.
const PUSH_TTL_SECS: u32 = 24 * 60 * 60;

/// Result of one protocol-level push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The endpoint will never accept pushes again; prune it.
    Terminal(String),
    /// Worth trying again on the next message; nothing to clean up.
    Transient(String),
}

/// Delivers one encrypted notification to one subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> PushOutcome;
}

/// Web Push over HTTPS with VAPID and `aes128gcm` encryption.
pub struct WebPushSender {
    client: reqwest::Client,
    vapid: Arc<VapidKey>,
    subject: String,
}

impl WebPushSender {
    pub fn new(vapid: Arc<VapidKey>, subject: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            vapid,
            subject,
        })
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> PushOutcome {
        let keys = match ClientKeys::parse(&subscription.keys.p256dh, &subscription.keys.auth) {
            Ok(keys) => keys,
            Err(e) => return PushOutcome::Terminal(format!("unusable subscription keys: {e}")),
        };

        let body = match encrypt::encrypt(&keys, payload) {
            Ok(body) => body,
            Err(e) => return encrypt_failure(e),
        };

        let authorization = match self.vapid.authorization(&subscription.endpoint, &self.subject) {
            Ok(header) => header,
            Err(e) => return vapid_failure(e),
        };

        let response = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", PUSH_TTL_SECS.to_string())
            .header("Urgency", "high")
            .header(CONTENT_ENCODING, "aes128gcm")
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(AUTHORIZATION, authorization)
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                debug!("Push service answered {} for {}", status, subscription.endpoint);
                classify(status)
            }
            // Timeouts and connection failures land here.
            Err(e) => PushOutcome::Transient(e.to_string()),
        }
    }
}

/// Only faults of the subscription itself are terminal. Derivation, cipher
/// and signing failures are local and leave the subscription in place.
fn encrypt_failure(e: EncryptError) -> PushOutcome {
    match e {
        EncryptError::BadPublicKey | EncryptError::BadAuthSecret => {
            PushOutcome::Terminal(e.to_string())
        }
        EncryptError::TooLarge(_) | EncryptError::Derive | EncryptError::Cipher => {
            PushOutcome::Transient(e.to_string())
        }
    }
}

fn vapid_failure(e: VapidError) -> PushOutcome {
    match e {
        VapidError::BadEndpoint(_) => PushOutcome::Terminal(e.to_string()),
        VapidError::BadPrivateKey | VapidError::Sign(_) => PushOutcome::Transient(e.to_string()),
    }
}

fn classify(status: StatusCode) -> PushOutcome {
    match status {
        s if s.is_success() => PushOutcome::Delivered,
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            PushOutcome::Terminal(format!("endpoint gone ({status})"))
        }
        s => PushOutcome::Transient(format!("push service returned {s}")),
    }
}
