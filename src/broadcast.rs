use crate::protocol::{encode_message, Message};
use crate::state::AppState;
use crate::types::ConnectionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Who an outbound frame is meant for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    AllExcept(ConnectionId),
}

/// An encoded frame on its way to connected sockets
#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub text: Arc<str>,
}

impl Outbound {
    pub fn is_for(&self, conn_id: &str) -> bool {
        match &self.audience {
            Audience::Everyone => true,
            Audience::AllExcept(origin) => origin != conn_id,
        }
    }
}

/// Fan-out hub shared by every connection task.
///
/// Each socket subscribes once and filters by [`Outbound::is_for`]. A send to
/// one slow subscriber never blocks the others: the channel drops its oldest
/// frames for that subscriber instead.
#[derive(Debug, Clone)]
pub struct Relay {
    tx: broadcast::Sender<Outbound>,
}

impl Relay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.tx.subscribe()
    }

    /// Number of connections currently subscribed
    pub fn connection_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn to_others(&self, origin: &str, message: &Message) {
        self.publish_message(Audience::AllExcept(origin.to_string()), message);
    }

    pub fn to_all(&self, message: &Message) {
        self.publish_message(Audience::Everyone, message);
    }

    /// Forward an undecoded frame unchanged
    pub fn forward_raw(&self, origin: &str, text: &str) {
        self.publish(Audience::AllExcept(origin.to_string()), Arc::from(text));
    }

    fn publish_message(&self, audience: Audience, message: &Message) {
        match encode_message(message) {
            Ok(text) => self.publish(audience, Arc::from(text)),
            Err(e) => tracing::error!("Failed to encode {}: {}", message.kind(), e),
        }
    }

    fn publish(&self, audience: Audience, text: Arc<str>) {
        // Ignore send errors (no receivers connected is fine)
        let _ = self.tx.send(Outbound { audience, text });
    }
}

/// Spawn a background task that evicts lobbies idle for longer than the
/// configured TTL
pub fn spawn_lobby_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = state.config.sweep_interval;
        let ttl = state.config.lobby_idle_ttl;
        loop {
            tokio::time::sleep(period).await;
            let evicted = state.evict_idle(ttl).await;
            if !evicted.is_empty() {
                tracing::info!("Evicted {} idle lobbies", evicted.len());
            }
        }
    })
}
