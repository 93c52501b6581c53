use std::sync::Arc;

use async_trait::async_trait;
use subshop_messaging_core::{EmailNotificationMessage, MessageHandler, ProcessingError};
use tracing::{info, instrument};

use crate::error::EmailError;
use crate::repository::EmailSender;

/// Sends `email.*` notifications through the configured [`EmailSender`].
pub struct EmailHandler {
    sender: Arc<dyn EmailSender>,
}

impl EmailHandler {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

fn looks_like_address(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.ends_with('.'),
        None => false,
    }
}

#[async_trait]
impl MessageHandler for EmailHandler {
    type Message = EmailNotificationMessage;

    #[instrument(skip_all, fields(notification_type = %message.notification_type, customer_id = %message.customer_id))]
    async fn handle(&self, message: EmailNotificationMessage) -> Result<(), ProcessingError> {
        if !looks_like_address(&message.email) {
            return Err(EmailError::InvalidRecipient(message.email).into());
        }

        self.sender
            .send(
                message.email.trim(),
                &message.subject,
                &message.notification_type,
                &message.data,
            )
            .await?;

        info!("email sent");
        Ok(())
    }
}
