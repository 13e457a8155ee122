use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use parley_auth::TokenService;
use parley_types::events::ServerEvent;
use parley_types::{DeliveryError, Identity, UserId};

/// Identifies one live transport connection.
pub type ConnectionId = Uuid;

/// Binds live connections to verified identities and groups them per user.
///
/// The registry is the only owner of connection membership: callers get
/// `connect/join/leave` and addressed delivery, never the raw maps.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tokens: Arc<TokenService>,
    state: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    /// Every open connection, joined or not
    connections: HashMap<ConnectionId, ConnectionEntry>,

    /// Delivery groups: user -> joined connections
    rooms: HashMap<UserId, HashSet<ConnectionId>>,
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<ServerEvent>,
    identity: Option<Identity>,
}

impl RegistryState {
    fn remove_from_room(&mut self, user_id: UserId, conn_id: ConnectionId) {
        if let Some(room) = self.rooms.get_mut(&user_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                self.rooms.remove(&user_id);
            }
        }
    }
}

impl SessionRegistry {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tokens,
                state: RwLock::new(RegistryState::default()),
            }),
        }
    }

    /// Register a freshly accepted, not yet authenticated connection.
    /// Returns its id and the queue of events to write to it.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .state
            .write()
            .await
            .connections
            .insert(conn_id, ConnectionEntry { tx, identity: None });
        (conn_id, rx)
    }

    /// Verify `token` and bind the connection to its identity.
    ///
    /// On failure the connection gets an `error` event and stays open and
    /// unauthenticated. Joining again rebinds to the new identity.
    pub async fn join(&self, conn_id: ConnectionId, token: &str) -> Result<Identity, DeliveryError> {
        let identity = match self.inner.tokens.verify(token) {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Connection {} failed to join: {}", conn_id, e);
                self.send_to_connection(conn_id, ServerEvent::error("Invalid token"))
                    .await;
                return Err(e.into());
            }
        };

        let mut state = self.inner.state.write().await;
        let previous = match state.connections.get_mut(&conn_id) {
            Some(entry) => {
                let _ = entry.tx.send(ServerEvent::Joined {
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                });
                entry.identity.replace(identity.clone())
            }
            None => return Err(DeliveryError::NotFound("connection")),
        };

        if let Some(previous) = previous {
            state.remove_from_room(previous.user_id, conn_id);
        }
        state
            .rooms
            .entry(identity.user_id)
            .or_default()
            .insert(conn_id);

        info!("{} ({}) joined on {}", identity.username, identity.user_id, conn_id);
        Ok(identity)
    }

    /// Forget the connection entirely. Safe to call more than once.
    pub async fn leave(&self, conn_id: ConnectionId) {
        let mut state = self.inner.state.write().await;
        let Some(entry) = state.connections.remove(&conn_id) else {
            return;
        };
        if let Some(identity) = entry.identity {
            state.remove_from_room(identity.user_id, conn_id);
            info!("{} ({}) left {}", identity.username, identity.user_id, conn_id);
        }
    }

    pub async fn identity(&self, conn_id: ConnectionId) -> Option<Identity> {
        self.inner
            .state
            .read()
            .await
            .connections
            .get(&conn_id)
            .and_then(|entry| entry.identity.clone())
    }

    /// Queue an event for one connection. Returns false if it is gone.
    pub async fn send_to_connection(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        let state = self.inner.state.read().await;
        match state.connections.get(&conn_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Fan an event out to every joined connection of `user_id`.
    /// Returns how many connections accepted it; an empty group is not an error.
    pub async fn deliver_to_user(&self, user_id: UserId, event: ServerEvent) -> usize {
        let state = self.inner.state.read().await;
        let Some(room) = state.rooms.get(&user_id) else {
            trace!("No live sessions for user {}, skipping {}", user_id, event.name());
            return 0;
        };

        let mut delivered = 0;
        for conn_id in room {
            match state.connections.get(conn_id) {
                Some(entry) if entry.tx.send(event.clone()).is_ok() => delivered += 1,
                _ => warn!("Dropping {} for closing connection {}", event.name(), conn_id),
            }
        }
        delivered
    }

    /// Number of joined connections for a user.
    pub async fn sessions_for(&self, user_id: UserId) -> usize {
        self.inner
            .state
            .read()
            .await
            .rooms
            .get(&user_id)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (SessionRegistry, Arc<TokenService>) {
        let tokens = Arc::new(TokenService::new("registry-test"));
        (SessionRegistry::new(tokens.clone()), tokens)
    }

    #[tokio::test]
    async fn join_binds_and_acknowledges() {
        let (registry, tokens) = registry();
        let (conn, mut rx) = registry.connect().await;

        let token = tokens.issue(UserId(2), "bob").unwrap();
        let identity = registry.join(conn, &token).await.unwrap();

        assert_eq!(identity.user_id, UserId(2));
        assert_eq!(registry.sessions_for(UserId(2)).await, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::Joined {
                user_id: UserId(2),
                username: "bob".into()
            }
        );
    }

    #[tokio::test]
    async fn bad_token_reports_error_and_stays_unjoined() {
        let (registry, _) = registry();
        let (conn, mut rx) = registry.connect().await;

        let result = registry.join(conn, "garbage").await;
        assert!(matches!(result, Err(DeliveryError::Unauthorized)));
        assert!(matches!(rx.recv().await, Some(ServerEvent::Error { .. })));
        assert!(registry.identity(conn).await.is_none());

        // Still usable afterwards.
        assert!(registry.send_to_connection(conn, ServerEvent::error("x")).await);
    }

    #[tokio::test]
    async fn delivers_to_every_session_of_the_user_only() {
        let (registry, tokens) = registry();
        let bob = tokens.issue(UserId(2), "bob").unwrap();
        let carol = tokens.issue(UserId(3), "carol").unwrap();

        let (phone, mut phone_rx) = registry.connect().await;
        let (laptop, mut laptop_rx) = registry.connect().await;
        let (other, mut other_rx) = registry.connect().await;
        registry.join(phone, &bob).await.unwrap();
        registry.join(laptop, &bob).await.unwrap();
        registry.join(other, &carol).await.unwrap();
        for rx in [&mut phone_rx, &mut laptop_rx, &mut other_rx] {
            rx.recv().await.unwrap(); // joined
        }

        let n = registry
            .deliver_to_user(UserId(2), ServerEvent::error("ping"))
            .await;
        assert_eq!(n, 2);
        assert!(phone_rx.try_recv().is_ok());
        assert!(laptop_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_group_is_a_no_op() {
        let (registry, _) = registry();
        assert_eq!(
            registry.deliver_to_user(UserId(9), ServerEvent::error("x")).await,
            0
        );
    }

    #[tokio::test]
    async fn leave_removes_all_references() {
        let (registry, tokens) = registry();
        let (conn, _rx) = registry.connect().await;
        registry
            .join(conn, &tokens.issue(UserId(2), "bob").unwrap())
            .await
            .unwrap();

        registry.leave(conn).await;
        registry.leave(conn).await;

        assert_eq!(registry.sessions_for(UserId(2)).await, 0);
        assert!(registry.identity(conn).await.is_none());
        assert!(!registry.send_to_connection(conn, ServerEvent::error("x")).await);
        assert_eq!(
            registry.deliver_to_user(UserId(2), ServerEvent::error("x")).await,
            0
        );
    }

    #[tokio::test]
    async fn rejoin_moves_connection_between_groups() {
        let (registry, tokens) = registry();
        let (conn, _rx) = registry.connect().await;
        registry
            .join(conn, &tokens.issue(UserId(2), "bob").unwrap())
            .await
            .unwrap();
        registry
            .join(conn, &tokens.issue(UserId(3), "carol").unwrap())
            .await
            .unwrap();

        assert_eq!(registry.sessions_for(UserId(2)).await, 0);
        assert_eq!(registry.sessions_for(UserId(3)).await, 1);
    }

    #[tokio::test]
    async fn closed_receiver_is_skipped() {
        let (registry, tokens) = registry();
        let token = tokens.issue(UserId(2), "bob").unwrap();
        let (dead, dead_rx) = registry.connect().await;
        let (live, mut live_rx) = registry.connect().await;
        registry.join(dead, &token).await.unwrap();
        registry.join(live, &token).await.unwrap();
        drop(dead_rx);
        live_rx.recv().await.unwrap();

        let n = registry
            .deliver_to_user(UserId(2), ServerEvent::error("x"))
            .await;
        assert_eq!(n, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_connects_and_disconnects_for_one_user() {
        let (registry, tokens) = registry();
        let token = tokens.issue(UserId(2), "bob").unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                let (conn, rx) = registry.connect().await;
                registry.join(conn, &token).await.unwrap();
                if i % 2 == 0 {
                    registry.leave(conn).await;
                    None
                } else {
                    Some((conn, rx))
                }
            }));
        }

        let mut kept = Vec::new();
        for handle in handles {
            if let Some(conn) = handle.await.unwrap() {
                kept.push(conn);
            }
        }
        assert_eq!(registry.sessions_for(UserId(2)).await, 16);

        for (conn, _rx) in kept {
            registry.leave(conn).await;
        }
        assert_eq!(registry.sessions_for(UserId(2)).await, 0);
    }
}
