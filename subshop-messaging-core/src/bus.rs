// subshop-messaging-core/src/bus.rs
use std::sync::Arc;

use async_trait::async_trait;

use crate::{ConsumerHandle, MessageHandler, MessagingError, RoutedMessage};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish<T: serde::Serialize + Send + Sync>(
        &self,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), MessagingError>;

    async fn publish_routed<M: RoutedMessage>(&self, message: &M) -> Result<(), MessagingError> {
        let routing_key = message.routing_key();
        self.publish(&routing_key, message).await
    }
}

#[async_trait]
pub trait EventBus: EventPublisher {
    /// Declares the consumer's queue, binds it and starts consuming. The returned
    /// handle is already registered for restart after reconnects.
    async fn subscribe<H: MessageHandler>(
        &self,
        spec: ConsumerSpec,
        handler: Arc<H>,
    ) -> Result<Arc<dyn ConsumerHandle>, MessagingError>;
}

/// Static description of a long-lived consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSpec {
    /// Registry key.
    pub name: String,
    /// Durable queue consumed by this consumer.
    pub queue: String,
    /// Routing-key patterns bound on the topic exchange.
    pub bindings: Vec<String>,
}

impl ConsumerSpec {
    pub fn new(name: &str, queue: &str, bindings: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            queue: queue.to_string(),
            bindings: bindings.iter().map(|s| s.to_string()).collect(),
        }
    }
}
