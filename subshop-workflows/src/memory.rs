//! In-memory collaborators for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use subshop_messaging_core::SubscriptionStatus;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{EmailError, RepositoryError};
use crate::repository::{
    Customer, CustomerRepository, EmailSender, ProductRepository, Subscription,
    SubscriptionRepository,
};

#[derive(Default)]
pub struct InMemorySubscriptions {
    rows: RwLock<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptions {
    pub async fn insert(&self, sub: Subscription) {
        self.rows.write().await.insert(sub.id, sub);
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptions {
    async fn get_by_id(&self, id: Uuid) -> Result<Subscription, RepositoryError> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("subscription", id))
    }

    async fn renew(
        &self,
        id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if period_end <= period_start {
            return Err(RepositoryError::Validation("empty billing period".into()));
        }
        let mut rows = self.rows.write().await;
        let sub = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::not_found("subscription", id))?;
        sub.status = SubscriptionStatus::Active;
        sub.current_period_start = period_start;
        sub.current_period_end = period_end;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProducts {
    stock: RwLock<HashMap<Uuid, i32>>,
}

impl InMemoryProducts {
    pub async fn set_stock(&self, product_id: Uuid, level: i32) {
        self.stock.write().await.insert(product_id, level);
    }
}

#[async_trait]
impl ProductRepository for InMemoryProducts {
    async fn stock(&self, product_id: Uuid) -> Result<i32, RepositoryError> {
        self.stock
            .read()
            .await
            .get(&product_id)
            .copied()
            .ok_or_else(|| RepositoryError::not_found("product", product_id))
    }

    async fn increment_stock(&self, product_id: Uuid, quantity: i32) -> Result<i32, RepositoryError> {
        let mut stock = self.stock.write().await;
        let level = stock
            .get_mut(&product_id)
            .ok_or_else(|| RepositoryError::not_found("product", product_id))?;
        *level = level
            .checked_add(quantity)
            .ok_or_else(|| RepositoryError::Validation("stock overflow".into()))?;
        Ok(*level)
    }

    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> Result<i32, RepositoryError> {
        let mut stock = self.stock.write().await;
        let level = stock
            .get_mut(&product_id)
            .ok_or_else(|| RepositoryError::not_found("product", product_id))?;
        if *level < quantity {
            return Err(RepositoryError::Validation(format!(
                "stock would go negative ({} - {})",
                level, quantity
            )));
        }
        *level -= quantity;
        Ok(*level)
    }
}

#[derive(Default)]
pub struct InMemoryCustomers {
    rows: RwLock<HashMap<Uuid, Customer>>,
}

impl InMemoryCustomers {
    pub async fn insert(&self, customer: Customer) {
        self.rows.write().await.insert(customer.id, customer);
    }
}

#[async_trait]
impl CustomerRepository for InMemoryCustomers {
    async fn get_by_id(&self, id: Uuid) -> Result<Customer, RepositoryError> {
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("customer", id))
    }
}

pub const KNOWN_TEMPLATES: &[&str] = &["renewal", "status_change", "payment_failed", "welcome"];

/// Logs instead of sending. Rejects templates outside [`KNOWN_TEMPLATES`].
#[derive(Default)]
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &HashMap<String, serde_json::Value>,
    ) -> Result<(), EmailError> {
        if !KNOWN_TEMPLATES.contains(&template) {
            return Err(EmailError::UnknownTemplate(template.to_string()));
        }
        info!(to, subject, template, fields = data.len(), "email (not sent, logging sender)");
        Ok(())
    }
}
