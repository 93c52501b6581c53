// subshop-messaging-core/src/types.rs
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MessagingError;

pub mod routing {
    //! Routing keys used on the topic exchange. Callers build the key; the publisher
    //! only forwards it.

    pub const SUBSCRIPTION_RENEWAL: &str = "subscription.renewal";
    pub const SUBSCRIPTION_STATUS_PATTERN: &str = "subscription.status.*";
    pub const EMAIL_PATTERN: &str = "email.*";
    pub const STOCK_PATTERN: &str = "stock.*";

    pub fn subscription_status(new_status: &str) -> String {
        format!("subscription.status.{}", new_status)
    }

    pub fn email(notification_type: &str) -> String {
        format!("email.{}", notification_type)
    }

    pub fn stock(operation: &str) -> String {
        format!("stock.{}", operation)
    }
}

/// A payload that knows the routing key it is published under.
pub trait RoutedMessage: Serialize + Send + Sync {
    fn routing_key(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Incomplete,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockOperation {
    Increment,
    Decrement,
}

impl StockOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockOperation::Increment => "increment",
            StockOperation::Decrement => "decrement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRenewalMessage {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub price_id: String,
    pub quantity: i32,
    pub renewal_date: DateTime<Utc>,
}

impl RoutedMessage for SubscriptionRenewalMessage {
    fn routing_key(&self) -> String {
        routing::SUBSCRIPTION_RENEWAL.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatusChangeMessage {
    pub subscription_id: Uuid,
    pub customer_id: Uuid,
    pub old_status: SubscriptionStatus,
    pub new_status: SubscriptionStatus,
    pub change_date: DateTime<Utc>,
}

impl RoutedMessage for SubscriptionStatusChangeMessage {
    fn routing_key(&self) -> String {
        routing::subscription_status(self.new_status.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailNotificationMessage {
    /// Template type, e.g. `renewal`. Also the last segment of the routing key.
    #[serde(rename = "type")]
    pub notification_type: String,
    pub customer_id: Uuid,
    pub email: String,
    pub subject: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl RoutedMessage for EmailNotificationMessage {
    fn routing_key(&self) -> String {
        routing::email(&self.notification_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUpdateMessage {
    pub product_id: Uuid,
    pub quantity: i32,
    pub operation: StockOperation,
}

impl RoutedMessage for StockUpdateMessage {
    fn routing_key(&self) -> String {
        routing::stock(self.operation.as_str())
    }
}

/// Serialized message ready to be handed to the broker.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub persistent: bool,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Serializes `payload` as JSON. Envelopes are always persistent.
    pub fn json<T: Serialize + ?Sized>(routing_key: &str, payload: &T) -> Result<Self, MessagingError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| MessagingError::Serialization(e.to_string()))?;
        Ok(Self {
            routing_key: routing_key.to_string(),
            body,
            persistent: true,
            timestamp: Utc::now(),
        })
    }
}
