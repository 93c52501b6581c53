#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use subshop_messaging_core::{
    EventPublisher, MessagingError, SubscriptionRenewalMessage, SubscriptionStatus,
};
use subshop_workflows::memory::{InMemoryCustomers, InMemoryProducts, InMemorySubscriptions};
use subshop_workflows::repository::{Customer, ProductRepository, Subscription};
use subshop_workflows::RepositoryError;
use uuid::Uuid;

/// Captures published messages as `(routing_key, body)`.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl RecordingPublisher {
    pub fn routing_keys(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(rk, _)| rk.clone()).collect()
    }

    pub fn body(&self, routing_key: &str) -> serde_json::Value {
        let sent = self.sent.lock().unwrap();
        let (_, body) = sent
            .iter()
            .find(|(rk, _)| rk == routing_key)
            .unwrap_or_else(|| panic!("nothing published on {routing_key}"));
        serde_json::from_slice(body).unwrap()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish<T: serde::Serialize + Send + Sync>(
        &self,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), MessagingError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| MessagingError::Serialization(e.to_string()))?;
        self.sent.lock().unwrap().push((routing_key.to_string(), body));
        Ok(())
    }
}

/// Broker that is always down.
#[derive(Clone, Default)]
pub struct DownPublisher {
    pub attempts: Arc<AtomicU32>,
}

#[async_trait]
impl EventPublisher for DownPublisher {
    async fn publish<T: serde::Serialize + Send + Sync>(
        &self,
        _routing_key: &str,
        _payload: &T,
    ) -> Result<(), MessagingError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(MessagingError::Connection("broker unreachable".into()))
    }
}

/// Product repository whose first `failures` calls report the database as unavailable.
pub struct FlakyProducts {
    pub inner: Arc<InMemoryProducts>,
    pub failures: AtomicU32,
}

impl FlakyProducts {
    pub fn new(inner: Arc<InMemoryProducts>, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }

    fn trip(&self) -> Result<(), RepositoryError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(RepositoryError::Unavailable("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for FlakyProducts {
    async fn stock(&self, product_id: Uuid) -> Result<i32, RepositoryError> {
        self.trip()?;
        self.inner.stock(product_id).await
    }

    async fn increment_stock(&self, product_id: Uuid, quantity: i32) -> Result<i32, RepositoryError> {
        self.trip()?;
        self.inner.increment_stock(product_id, quantity).await
    }

    async fn decrement_stock(&self, product_id: Uuid, quantity: i32) -> Result<i32, RepositoryError> {
        self.trip()?;
        self.inner.decrement_stock(product_id, quantity).await
    }
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub struct Fixture {
    pub subscriptions: Arc<InMemorySubscriptions>,
    pub customers: Arc<InMemoryCustomers>,
    pub subscription: Subscription,
    pub customer: Customer,
}

/// A past-due subscription whose period ends on 2026-03-01, plus its customer.
pub async fn fixture() -> Fixture {
    let customer = Customer {
        id: Uuid::new_v4(),
        email: "ana@example.com".into(),
        name: "Ana".into(),
    };
    let subscription = Subscription {
        id: Uuid::new_v4(),
        customer_id: customer.id,
        product_id: Uuid::new_v4(),
        price_id: "price_monthly".into(),
        quantity: 3,
        status: SubscriptionStatus::PastDue,
        current_period_start: at(2026, 2, 1),
        current_period_end: at(2026, 3, 1),
    };

    let subscriptions = Arc::new(InMemorySubscriptions::default());
    subscriptions.insert(subscription.clone()).await;
    let customers = Arc::new(InMemoryCustomers::default());
    customers.insert(customer.clone()).await;

    Fixture {
        subscriptions,
        customers,
        subscription,
        customer,
    }
}

pub fn renewal_for(sub: &Subscription) -> SubscriptionRenewalMessage {
    SubscriptionRenewalMessage {
        subscription_id: sub.id,
        customer_id: sub.customer_id,
        product_id: sub.product_id,
        price_id: sub.price_id.clone(),
        quantity: sub.quantity,
        renewal_date: sub.current_period_end,
    }
}
