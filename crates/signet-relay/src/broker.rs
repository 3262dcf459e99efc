//! The central routing state (§4.E, §7): one `ClientHandle` per live
//! connection, a `user_id -> connection` index for routing, and the
//! per-connection rate limiter. Grounded on the teacher's `ServerState`
//! (`parking_lot::RwLock` over a connection map, exclusive per-connection
//! task state) generalized from Veilid routes to WebSocket connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ed25519_dalek::{Signature, VerifyingKey};
use parking_lot::{Mutex, RwLock};
use signet_crypto::{Config, IdentityKeyPair};
use tokio::sync::{mpsc, Notify};

use crate::error::RelayError;

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connected,
    Authenticated,
}

/// Token-bucket rate limiter, refilled continuously rather than in discrete
/// per-minute ticks so a burst right after a quiet period isn't penalized.
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, per_minute: u32) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity: f64::from(capacity),
            refill_per_sec: f64::from(per_minute) / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-connection state shared between the connection task and the broker.
pub struct ClientHandle {
    pub conn_id: ConnId,
    state: RwLock<ClientState>,
    user_id: RwLock<Option<String>>,
    pub challenge: [u8; 32],
    outbound_tx: mpsc::Sender<Vec<u8>>,
    rate: Mutex<TokenBucket>,
    last_seen: RwLock<Instant>,
    /// Signaled when a newer connection for the same user supersedes this
    /// one, so the connection task's select loop can exit promptly.
    pub superseded: Notify,
}

impl ClientHandle {
    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    pub fn touch(&self) {
        *self.last_seen.write() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_seen.read().elapsed()
    }
}

#[derive(Debug, Default)]
pub struct StatsSnapshot {
    pub connected_clients: usize,
    pub authenticated_users: usize,
    pub messages_routed: u64,
    pub auth_failures: u64,
    pub rate_limited: u64,
    pub uptime_secs: u64,
}

#[derive(Default)]
struct Counters {
    messages_routed: AtomicU64,
    auth_failures: AtomicU64,
    rate_limited: AtomicU64,
}

/// The broker's shared routing table. One instance lives for the whole
/// process and is handed to every connection task as an `Arc`.
pub struct Broker {
    clients: RwLock<HashMap<ConnId, Arc<ClientHandle>>>,
    by_user: RwLock<HashMap<String, ConnId>>,
    next_conn_id: AtomicU64,
    started_at: Instant,
    counters: Counters,
    cfg: Config,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_config(Config::global().clone())
    }

    /// Build a broker against an explicit config rather than the process
    /// global, so tests can exercise non-default queue/rate-limit settings
    /// without mutating shared process state.
    pub fn with_config(cfg: Config) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            started_at: Instant::now(),
            counters: Counters::default(),
            cfg,
        }
    }

    /// Register a freshly accepted connection in `CONNECTED` state and hand
    /// back its id, its challenge, and the receiver half of its outbound
    /// queue.
    pub fn register(&self) -> (ConnId, Arc<ClientHandle>, mpsc::Receiver<Vec<u8>>) {
        let cfg = &self.cfg;
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut challenge = [0u8; 32];
        signet_crypto::primitives::rand_bytes(&mut challenge);
        let (tx, rx) = mpsc::channel(cfg.relay_queue_capacity);
        let handle = Arc::new(ClientHandle {
            conn_id,
            state: RwLock::new(ClientState::Connected),
            user_id: RwLock::new(None),
            challenge,
            outbound_tx: tx,
            rate: Mutex::new(TokenBucket::new(cfg.relay_rate_limit_burst, cfg.relay_rate_limit_per_minute)),
            last_seen: RwLock::new(Instant::now()),
            superseded: Notify::new(),
        });
        self.clients.write().insert(conn_id, handle.clone());
        (conn_id, handle, rx)
    }

    /// Verify the client's signature over its own challenge and, on success,
    /// promote the connection to `AUTHENTICATED`, superseding any prior
    /// connection already registered for this `user_id`.
    pub fn authenticate(
        &self,
        handle: &Arc<ClientHandle>,
        user_id: String,
        identity_sig_pub: [u8; 32],
        signature: [u8; 64],
    ) -> Result<(), RelayError> {
        let verifying_key =
            VerifyingKey::from_bytes(&identity_sig_pub).map_err(|_| RelayError::BadChallengeResponse)?;
        let signature = Signature::from_bytes(&signature);
        IdentityKeyPair::verify(&verifying_key, &handle.challenge, &signature)
            .map_err(|_| RelayError::BadChallengeResponse)?;

        *handle.state.write() = ClientState::Authenticated;
        *handle.user_id.write() = Some(user_id.clone());
        handle.touch();

        let previous = self.by_user.write().insert(user_id.clone(), handle.conn_id);
        if let Some(prev_conn_id) = previous {
            if prev_conn_id != handle.conn_id {
                if let Some(prev) = self.clients.read().get(&prev_conn_id).cloned() {
                    tracing::info!(user_id = %user_id, old_conn = prev_conn_id, new_conn = handle.conn_id, "connection superseded");
                    prev.superseded.notify_one();
                }
                self.clients.write().remove(&prev_conn_id);
            }
        }
        Ok(())
    }

    /// Route one already-framed envelope to `to_user`'s outbound queue.
    pub fn route(&self, to_user: &str, frame: Vec<u8>) -> Result<(), RelayError> {
        let conn_id = *self.by_user.read().get(to_user).ok_or(RelayError::UserOffline)?;
        let clients = self.clients.read();
        let handle = clients.get(&conn_id).ok_or(RelayError::UserOffline)?;
        match handle.outbound_tx.try_send(frame) {
            Ok(()) => {
                self.counters.messages_routed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(RelayError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RelayError::UserOffline),
        }
    }

    /// Consume one token from `handle`'s rate limiter, or reject.
    pub fn check_rate(&self, handle: &ClientHandle) -> Result<(), RelayError> {
        if handle.rate.lock().try_take() {
            Ok(())
        } else {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            Err(RelayError::RateLimited)
        }
    }

    pub fn record_auth_failure(&self) {
        self.counters.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a connection from both indices, but only if `by_user` still
    /// points at it (a superseded connection's own cleanup must not evict
    /// the connection that superseded it).
    pub fn remove(&self, handle: &ClientHandle) {
        self.clients.write().remove(&handle.conn_id);
        if let Some(user_id) = handle.user_id() {
            let mut by_user = self.by_user.write();
            if by_user.get(&user_id) == Some(&handle.conn_id) {
                by_user.remove(&user_id);
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            connected_clients: self.clients.read().len(),
            authenticated_users: self.by_user.read().len(),
            messages_routed: self.counters.messages_routed.load(Ordering::Relaxed),
            auth_failures: self.counters.auth_failures.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_challenge(identity: &IdentityKeyPair, challenge: &[u8; 32]) -> ([u8; 32], [u8; 64]) {
        let sig = identity.sign(challenge);
        (identity.signing_public_bytes(), sig.to_bytes())
    }

    #[test]
    fn register_starts_connected_and_unauthenticated() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        assert_eq!(handle.state(), ClientState::Connected);
        assert!(handle.user_id().is_none());
    }

    #[test]
    fn authenticate_with_valid_signature_promotes_to_authenticated() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        let identity = IdentityKeyPair::generate();
        let (sig_pub, sig) = sign_challenge(&identity, &handle.challenge);

        broker.authenticate(&handle, "alice".into(), sig_pub, sig).unwrap();
        assert_eq!(handle.state(), ClientState::Authenticated);
        assert_eq!(handle.user_id().as_deref(), Some("alice"));
    }

    #[test]
    fn authenticate_with_bad_signature_is_rejected() {
        let broker = Broker::new();
        let (_, handle, _rx) = broker.register();
        let identity = IdentityKeyPair::generate();
        let (sig_pub, mut sig) = sign_challenge(&identity, &handle.challenge);
        sig[0] ^= 1;

        assert!(matches!(
            broker.authenticate(&handle, "alice".into(), sig_pub, sig),
            Err(RelayError::BadChallengeResponse)
        ));
        assert_eq!(handle.state(), ClientState::Connected);
    }

    #[test]
    fn second_authentication_for_same_user_supersedes_first() {
        let broker = Broker::new();
        let identity = IdentityKeyPair::generate();

        let (_, handle_a, _rx_a) = broker.register();
        let (sig_pub_a, sig_a) = sign_challenge(&identity, &handle_a.challenge);
        broker.authenticate(&handle_a, "alice".into(), sig_pub_a, sig_a).unwrap();

        let (_, handle_b, _rx_b) = broker.register();
        let (sig_pub_b, sig_b) = sign_challenge(&identity, &handle_b.challenge);
        broker.authenticate(&handle_b, "alice".into(), sig_pub_b, sig_b).unwrap();

        assert_eq!(broker.stats().connected_clients, 1);
        assert_eq!(broker.stats().authenticated_users, 1);
    }

    #[test]
    fn route_to_offline_user_fails() {
        let broker = Broker::new();
        assert!(matches!(broker.route("nobody", vec![1, 2, 3]), Err(RelayError::UserOffline)));
    }

    #[test]
    fn route_delivers_to_authenticated_users_queue() {
        let broker = Broker::new();
        let (_, handle, mut rx) = broker.register();
        let identity = IdentityKeyPair::generate();
        let (sig_pub, sig) = sign_challenge(&identity, &handle.challenge);
        broker.authenticate(&handle, "bob".into(), sig_pub, sig).unwrap();

        broker.route("bob", vec![9, 9, 9]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![9, 9, 9]);
        assert_eq!(broker.stats().messages_routed, 1);
    }

    #[test]
    fn rate_limiter_rejects_after_burst_is_exhausted() {
        let broker = Broker::with_config(Config {
            relay_rate_limit_burst: 2,
            relay_rate_limit_per_minute: 0,
            ..Config::default()
        });
        let (_, handle, _rx) = broker.register();
        assert!(broker.check_rate(&handle).is_ok());
        assert!(broker.check_rate(&handle).is_ok());
        assert!(matches!(broker.check_rate(&handle), Err(RelayError::RateLimited)));
    }

    #[test]
    fn remove_does_not_evict_a_superseding_connection() {
        let broker = Broker::new();
        let identity = IdentityKeyPair::generate();

        let (_, handle_a, _rx_a) = broker.register();
        let (sig_pub_a, sig_a) = sign_challenge(&identity, &handle_a.challenge);
        broker.authenticate(&handle_a, "alice".into(), sig_pub_a, sig_a).unwrap();

        let (_, handle_b, _rx_b) = broker.register();
        let (sig_pub_b, sig_b) = sign_challenge(&identity, &handle_b.challenge);
        broker.authenticate(&handle_b, "alice".into(), sig_pub_b, sig_b).unwrap();

        // The superseded connection's own cleanup must not remove the new one.
        broker.remove(&handle_a);
        assert!(broker.route("alice", vec![1]).is_ok());
    }
}
