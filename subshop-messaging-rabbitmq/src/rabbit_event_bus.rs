use std::sync::Arc;

use async_trait::async_trait;
use lapin::{options::*, BasicProperties};
use tracing::{debug, instrument};

use crate::connection::RabbitConnection;
use crate::consumer::RabbitConsumer;
use crate::options::RabbitMqOptions;
use subshop_messaging_core::{
    ConsumerHandle, ConsumerSpec, Envelope, EventBus, EventPublisher, MessageHandler, MessagingError,
};

fn publish_err(e: lapin::Error) -> MessagingError {
    MessagingError::Publish(e.to_string())
}

/// Publisher and consumer factory on top of a shared [`RabbitConnection`].
#[derive(Clone)]
pub struct RabbitEventBus {
    connection: Arc<RabbitConnection>,
}

impl RabbitEventBus {
    pub async fn connect(opts: RabbitMqOptions) -> Result<Self, MessagingError> {
        let connection = RabbitConnection::connect(opts).await?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: Arc<RabbitConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<RabbitConnection> {
        &self.connection
    }

    pub async fn close(&self) -> Result<(), MessagingError> {
        self.connection.close().await
    }

    async fn publish_envelope(&self, envelope: &Envelope) -> Result<(), MessagingError> {
        // returned to the pool on drop, whichever way this function exits
        let ch = self.connection.borrow_channel().await?;
        let opts = self.connection.options();

        let props = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(if envelope.persistent { 2 } else { 1 })
            .with_timestamp(envelope.timestamp.timestamp().max(0) as u64);

        let confirm = ch
            .basic_publish(
                &opts.exchange,
                &envelope.routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &envelope.body,
                props,
            )
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;

        if confirm.is_nack() {
            return Err(MessagingError::Publish(
                "publisher confirm NACK".to_string(),
            ));
        }
        debug!(bytes = envelope.body.len(), "message published");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RabbitEventBus {
    #[instrument(skip(self, payload), err)]
    async fn publish<T: serde::Serialize + Send + Sync>(
        &self,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), MessagingError> {
        let envelope = Envelope::json(routing_key, payload)?;
        let timeout = self.connection.options().publish_timeout;

        tokio::time::timeout(timeout, self.publish_envelope(&envelope))
            .await
            .map_err(|_| MessagingError::Publish(format!("publish timed out after {:?}", timeout)))?
    }
}

#[async_trait]
impl EventBus for RabbitEventBus {
    async fn subscribe<H: MessageHandler>(
        &self,
        spec: ConsumerSpec,
        handler: Arc<H>,
    ) -> Result<Arc<dyn ConsumerHandle>, MessagingError> {
        self.connection.registry().ensure_vacant(&spec.name)?;
        let consumer = RabbitConsumer::new(Arc::clone(&self.connection), spec, handler);
        consumer.start().await?;
        Ok(Arc::new(consumer))
    }
}
