// subshop-messaging-core/src/registry.rs
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{error, info};

use crate::MessagingError;

/// Lifecycle of a long-lived consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConsumerState::Stopped => "stopped",
            ConsumerState::Starting => "starting",
            ConsumerState::Running => "running",
            ConsumerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    /// Idempotent: starting a running consumer is a no-op.
    async fn start(&self) -> Result<(), MessagingError>;

    /// Idempotent; safe before a successful `start`.
    async fn stop(&self) -> Result<(), MessagingError>;
}

type Entry = (String, Arc<dyn ConsumerHandle>);

/// Consumers to restart after a reconnect, in registration order.
#[derive(Clone, Default)]
pub struct ConsumerRegistry {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `handle` under `name`. An existing entry with the same name is
    /// replaced in place, so a name never maps to two handles.
    pub fn register(&self, name: &str, handle: Arc<dyn ConsumerHandle>) {
        let mut entries = self.lock();
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = handle,
            None => entries.push((name.to_string(), handle)),
        }
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ConsumerHandle>> {
        let mut entries = self.lock();
        let idx = entries.iter().position(|(n, _)| n == name)?;
        Some(entries.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|(n, _)| n == name)
    }

    /// Fails when `name` already belongs to a registered consumer. A second
    /// consumer under the same name would replace the first one here and leave
    /// it running unsupervised.
    pub fn ensure_vacant(&self, name: &str) -> Result<(), MessagingError> {
        if self.contains(name) {
            return Err(MessagingError::Subscribe(format!(
                "consumer `{}` is already registered",
                name
            )));
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Entry> {
        self.lock().clone()
    }

    /// Calls `start` on every consumer in registration order. Failures are
    /// logged and do not stop the remaining restarts. Returns how many started.
    pub async fn restart_all(&self) -> usize {
        let mut started = 0;
        for (name, handle) in self.snapshot() {
            match handle.start().await {
                Ok(()) => {
                    info!(consumer = %name, "consumer restarted");
                    started += 1;
                }
                Err(e) => error!(consumer = %name, error = %e, "consumer restart failed"),
            }
        }
        started
    }

    pub async fn stop_all(&self) {
        for (name, handle) in self.snapshot() {
            if let Err(e) = handle.stop().await {
                error!(consumer = %name, error = %e, "consumer stop failed");
            }
        }
    }
}
