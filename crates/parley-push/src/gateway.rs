use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use parley_db::Database;
use parley_types::api::SubscriptionPayload;
use parley_types::models::PushSubscription;
use parley_types::{DeliveryError, UserId};

use crate::encrypt::ClientKeys;
use crate::payload::PushPayload;
use crate::sender::{PushOutcome, PushSender};

/// Tally of one `send_to_user` fanout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub pruned: usize,
    pub failed: usize,
}

/// Owns the subscription lifecycle and push fanout for every user.
#[derive(Clone)]
pub struct PushGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    db: Arc<Database>,
    sender: Arc<dyn PushSender>,
    public_key: String,
}

impl PushGateway {
    pub fn new(db: Arc<Database>, sender: Arc<dyn PushSender>, public_key: String) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                db,
                sender,
                public_key,
            }),
        }
    }

    /// VAPID application server key, base64url.
    pub fn public_key(&self) -> &str {
        &self.inner.public_key
    }

    /// Validate and upsert by endpoint.
    pub async fn subscribe(
        &self,
        user_id: UserId,
        payload: SubscriptionPayload,
    ) -> Result<(), DeliveryError> {
        let subscription = validate(user_id, payload)?;

        self.inner
            .db
            .call(move |db| {
                db.upsert_subscription(
                    &subscription.endpoint,
                    subscription.user_id.0,
                    &subscription.keys.p256dh,
                    &subscription.keys.auth,
                )
            })
            .await?;

        info!("User {} subscribed a push endpoint", user_id);
        Ok(())
    }

    /// Delete-if-exists. Unknown endpoints are not an error.
    pub async fn unsubscribe(&self, endpoint: &str) -> Result<(), DeliveryError> {
        let endpoint = endpoint.to_string();
        let removed = self
            .inner
            .db
            .call(move |db| db.delete_subscription(&endpoint))
            .await?;
        debug!("Unsubscribe removed={}", removed);
        Ok(())
    }

    /// Push to every device the user registered. A dead endpoint is pruned
    /// and never stops delivery to the user's other devices.
    pub async fn send_to_user(&self, user_id: UserId, payload: &PushPayload) -> PushReport {
        let mut report = PushReport::default();

        let subscriptions = match self
            .inner
            .db
            .call(move |db| db.get_subscriptions_for_user(user_id.0))
            .await
        {
            Ok(rows) => rows
                .into_iter()
                .map(|row| row.into_subscription())
                .collect::<Vec<_>>(),
            Err(e) => {
                error!("Failed to load push subscriptions for user {}: {:#}", user_id, e);
                return report;
            }
        };

        if subscriptions.is_empty() {
            return report;
        }

        let body = match payload.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize push payload: {}", e);
                report.failed = subscriptions.len();
                return report;
            }
        };

        let sender = &self.inner.sender;
        let outcomes = join_all(
            subscriptions
                .iter()
                .map(|subscription| sender.send(subscription, &body)),
        )
        .await;

        for (subscription, outcome) in subscriptions.iter().zip(outcomes) {
            match outcome {
                PushOutcome::Delivered => report.delivered += 1,
                PushOutcome::Terminal(reason) => {
                    info!(
                        "Pruning push endpoint for user {}: {}",
                        user_id, reason
                    );
                    self.prune(&subscription.endpoint).await;
                    report.pruned += 1;
                }
                PushOutcome::Transient(reason) => {
                    warn!("Push to user {} failed, will retry on next message: {}", user_id, reason);
                    report.failed += 1;
                }
            }
        }

        debug!("Push fanout for user {}: {:?}", user_id, report);
        report
    }

    async fn prune(&self, endpoint: &str) {
        let endpoint = endpoint.to_string();
        if let Err(e) = self
            .inner
            .db
            .call(move |db| db.delete_subscription(&endpoint))
            .await
        {
            error!("Failed to prune push endpoint: {:#}", e);
        }
    }
}

fn validate(user_id: UserId, payload: SubscriptionPayload) -> Result<PushSubscription, DeliveryError> {
    let endpoint = payload.endpoint.trim();
    if endpoint.is_empty() {
        return Err(DeliveryError::invalid("subscription endpoint is required"));
    }
    let url = reqwest::Url::parse(endpoint)
        .map_err(|_| DeliveryError::invalid("subscription endpoint must be an absolute URL"))?;
    if !matches!(url.scheme(), "https" | "http") || !url.has_host() {
        return Err(DeliveryError::invalid("subscription endpoint must be an http(s) URL"));
    }

    let keys = payload
        .keys
        .filter(|k| !k.p256dh.trim().is_empty() && !k.auth.trim().is_empty())
        .ok_or_else(|| DeliveryError::invalid("subscription keys p256dh and auth are required"))?;
    ClientKeys::parse(&keys.p256dh, &keys.auth).map_err(|e| DeliveryError::invalid(e.to_string()))?;

    Ok(PushSubscription {
        endpoint: endpoint.to_string(),
        user_id,
        keys,
    })
}
