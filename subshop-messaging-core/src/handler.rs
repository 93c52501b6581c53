// subshop-messaging-core/src/handler.rs
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::ProcessingError;

/// Typed handler invoked once per decoded delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Message: DeserializeOwned + Send;

    async fn handle(&self, message: Self::Message) -> Result<(), ProcessingError>;

    /// Decides whether a failure is worth retrying. Anything not explicitly
    /// permanent is requeued.
    fn is_permanent(&self, error: &ProcessingError) -> bool {
        error.is_permanent()
    }
}

/// What the consumer does with a delivery after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Reject with requeue.
    Requeue,
    /// Reject without requeue.
    Reject,
}

/// Decodes `body` and runs `handler`, mapping the outcome to an ack decision.
///
/// Never fails: every error ends up as `Requeue` or `Reject`.
pub async fn process_delivery<H: MessageHandler>(
    handler: &H,
    routing_key: &str,
    body: &[u8],
) -> Disposition {
    let message: H::Message = match serde_json::from_slice(body) {
        Ok(m) => m,
        Err(e) => {
            warn!(routing_key, error = %e, "malformed delivery rejected");
            return Disposition::Reject;
        }
    };

    match handler.handle(message).await {
        Ok(()) => {
            debug!(routing_key, "delivery processed");
            Disposition::Ack
        }
        Err(err) if handler.is_permanent(&err) => {
            error!(routing_key, error = %err, "permanent failure, rejecting");
            Disposition::Reject
        }
        Err(err) => {
            warn!(routing_key, error = %err, "transient failure, requeueing");
            Disposition::Requeue
        }
    }
}
