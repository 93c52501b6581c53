//! Collaborators consumed by the message handlers. Production implementations
//! (Postgres repositories, the mail provider) live outside this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subshop_messaging_core::SubscriptionStatus;
use uuid::Uuid;

use crate::error::{EmailError, RepositoryError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub price_id: String,
    pub quantity: i32,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Subscription, RepositoryError>;

    /// Marks the subscription active for the new billing period.
    async fn renew(
        &self,
        id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn stock(&self, product_id: Uuid) -> Result<i32, RepositoryError>;

    /// Returns the new stock level.
    async fn increment_stock(&self, product_id: Uuid, quantity: i32) -> Result<i32, RepositoryError>;

    /// Returns the new stock level. Fails with `Validation` rather than going negative.
    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> Result<i32, RepositoryError>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Customer, RepositoryError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &HashMap<String, serde_json::Value>,
    ) -> Result<(), EmailError>;
}
