//! Subscription renewal, driven by `subscription.renewal` deliveries.
//!
//! Renewing is idempotent: a message whose renewal date is already covered by
//! the current billing period is acknowledged without side effects, so
//! redeliveries never renew twice.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use serde_json::json;
use subshop_messaging_core::{
    EmailNotificationMessage, EventPublisher, MessageHandler, ProcessingError, StockOperation,
    StockUpdateMessage, SubscriptionRenewalMessage, SubscriptionStatus,
    SubscriptionStatusChangeMessage,
};
use tracing::{info, instrument, warn};

use crate::repository::{CustomerRepository, Subscription, SubscriptionRepository};

pub const RENEWAL_EMAIL_TYPE: &str = "renewal";

#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    Renewed {
        previous_status: SubscriptionStatus,
        period_end: DateTime<Utc>,
    },
    /// Duplicate delivery; nothing changed.
    AlreadyRenewed,
}

/// End of the billing period starting at `start` (one calendar month).
pub fn next_period_end(start: DateTime<Utc>) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(1))
        .unwrap_or_else(|| start + Duration::days(30))
}

pub struct RenewalWorkflow<P> {
    subscriptions: Arc<dyn SubscriptionRepository>,
    customers: Arc<dyn CustomerRepository>,
    publisher: P,
}

impl<P: EventPublisher> RenewalWorkflow<P> {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        customers: Arc<dyn CustomerRepository>,
        publisher: P,
    ) -> Self {
        Self {
            subscriptions,
            customers,
            publisher,
        }
    }

    #[instrument(skip_all, fields(subscription_id = %msg.subscription_id, renewal_date = %msg.renewal_date))]
    pub async fn process(&self, msg: &SubscriptionRenewalMessage) -> Result<RenewalOutcome, ProcessingError> {
        if msg.quantity <= 0 {
            return Err(ProcessingError::permanent(format!(
                "invalid renewal quantity {}",
                msg.quantity
            )));
        }

        let sub = self.subscriptions.get_by_id(msg.subscription_id).await?;

        if sub.customer_id != msg.customer_id {
            return Err(ProcessingError::permanent(format!(
                "subscription {} does not belong to customer {}",
                sub.id, msg.customer_id
            )));
        }
        if sub.status == SubscriptionStatus::Canceled {
            return Err(ProcessingError::permanent(format!(
                "subscription {} is canceled",
                sub.id
            )));
        }
        if sub.current_period_end > msg.renewal_date {
            info!(period_end = %sub.current_period_end, "subscription already renewed, skipping");
            return Ok(RenewalOutcome::AlreadyRenewed);
        }

        let period_start = msg.renewal_date;
        let period_end = next_period_end(period_start);
        self.subscriptions
            .renew(sub.id, period_start, period_end)
            .await?;
        info!(previous_status = %sub.status, %period_end, "subscription renewed");

        self.emit_follow_ups(&sub, msg, period_end).await;

        Ok(RenewalOutcome::Renewed {
            previous_status: sub.status,
            period_end,
        })
    }

    /// Best-effort: the renewal is already committed, so failures are only logged.
    async fn emit_follow_ups(
        &self,
        sub: &Subscription,
        msg: &SubscriptionRenewalMessage,
        period_end: DateTime<Utc>,
    ) {
        let status_change = SubscriptionStatusChangeMessage {
            subscription_id: sub.id,
            customer_id: sub.customer_id,
            old_status: sub.status,
            new_status: SubscriptionStatus::Active,
            change_date: Utc::now(),
        };
        if let Err(e) = self.publisher.publish_routed(&status_change).await {
            warn!(error = %e, "failed to publish status change");
        }

        let stock = StockUpdateMessage {
            product_id: msg.product_id,
            quantity: msg.quantity,
            operation: StockOperation::Decrement,
        };
        if let Err(e) = self.publisher.publish_routed(&stock).await {
            warn!(error = %e, "failed to publish stock update");
        }

        let customer = match self.customers.get_by_id(msg.customer_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "customer lookup failed, renewal email skipped");
                return;
            }
        };

        let mut data = HashMap::new();
        data.insert("customer_name".to_string(), json!(customer.name));
        data.insert("subscription_id".to_string(), json!(sub.id));
        data.insert("product_id".to_string(), json!(msg.product_id));
        data.insert("price_id".to_string(), json!(msg.price_id));
        data.insert("quantity".to_string(), json!(msg.quantity));
        data.insert("renewal_date".to_string(), json!(msg.renewal_date));
        data.insert("next_renewal_date".to_string(), json!(period_end));

        let email = EmailNotificationMessage {
            notification_type: RENEWAL_EMAIL_TYPE.to_string(),
            customer_id: customer.id,
            email: customer.email,
            subject: "Your subscription has been renewed".to_string(),
            data,
        };
        if let Err(e) = self.publisher.publish_routed(&email).await {
            warn!(error = %e, "failed to publish renewal email");
        }
    }
}

#[async_trait]
impl<P: EventPublisher + 'static> MessageHandler for RenewalWorkflow<P> {
    type Message = SubscriptionRenewalMessage;

    async fn handle(&self, message: SubscriptionRenewalMessage) -> Result<(), ProcessingError> {
        self.process(&message).await.map(|_| ())
    }
}
