// subshop-messaging-core/src/supervisor.rs
//! Reconnect supervision.
//!
//! The supervisor waits on the one-shot "connection lost" signal of the current
//! session, then invalidates the session, reconnects with exponential backoff
//! (forever, until shutdown) and restarts every registered consumer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::{BackoffPolicy, ConsumerRegistry, MessagingError, Shutdown};

/// Fires once, with a reason, when the session it belongs to is gone.
pub type ConnectionLost = oneshot::Receiver<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Shared, observable connection state.
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens the broker session and declares the exchange.
    async fn connect(&self) -> Result<ConnectionLost, MessagingError>;

    /// Forgets the current session and every channel opened on it.
    async fn invalidate(&self);
}

pub struct Supervisor<C: Connector> {
    connector: Arc<C>,
    registry: ConsumerRegistry,
    backoff: BackoffPolicy,
    shutdown: Shutdown,
    status: ConnectionStatus,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: Arc<C>,
        registry: ConsumerRegistry,
        backoff: BackoffPolicy,
        shutdown: Shutdown,
        status: ConnectionStatus,
    ) -> Self {
        Self {
            connector,
            registry,
            backoff,
            shutdown,
            status,
        }
    }

    /// Supervises the session behind `lost` and every later one. Returns after shutdown.
    pub async fn run(self, mut lost: ConnectionLost) {
        loop {
            let reason = tokio::select! {
                _ = self.shutdown.wait() => break,
                reason = &mut lost => reason.unwrap_or_else(|_| "connection dropped".to_string()),
            };
            if self.shutdown.is_triggered() {
                break;
            }

            warn!(%reason, "broker connection lost");
            self.status.set(ConnectionState::Reconnecting);
            self.connector.invalidate().await;

            lost = match self.reconnect().await {
                Some(next) => next,
                None => break,
            };

            let restarted = self.registry.restart_all().await;
            info!(restarted, total = self.registry.len(), "consumers restarted after reconnect");
        }
        self.status.set(ConnectionState::Closed);
        info!("connection supervisor stopped");
    }

    async fn reconnect(&self) -> Option<ConnectionLost> {
        let mut backoff = self.backoff.start();
        let mut attempt: u32 = 0;
        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = self.shutdown.wait() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
            match self.connector.connect().await {
                Ok(lost) => {
                    if self.shutdown.is_triggered() {
                        return None;
                    }
                    self.status.set(ConnectionState::Connected);
                    info!(attempt, "reconnected to broker");
                    return Some(lost);
                }
                Err(e) => {
                    error!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "reconnect attempt failed");
                }
            }
        }
    }
}
