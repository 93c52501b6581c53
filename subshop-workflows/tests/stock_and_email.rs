mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::FlakyProducts;
use subshop_messaging_core::{
    process_delivery, ConsumerHandle, ConsumerSpec, Disposition, EmailNotificationMessage,
    EventBus, EventPublisher, MessageHandler, MessagingError, StockOperation, StockUpdateMessage,
};
use subshop_workflows::consumers::{EMAIL_QUEUE, RENEWAL_QUEUE, STOCK_QUEUE};
use subshop_workflows::memory::{InMemoryProducts, LoggingEmailSender};
use subshop_workflows::repository::{EmailSender, ProductRepository};
use subshop_workflows::{start_consumers, Collaborators, EmailError, EmailHandler, StockHandler};
use uuid::Uuid;

fn stock_body(product_id: Uuid, quantity: i32, operation: StockOperation) -> Vec<u8> {
    serde_json::to_vec(&StockUpdateMessage {
        product_id,
        quantity,
        operation,
    })
    .unwrap()
}

#[tokio::test]
async fn transient_stock_failure_is_requeued_then_applied_once() {
    let products = Arc::new(InMemoryProducts::default());
    let product_id = Uuid::new_v4();
    products.set_stock(product_id, 10).await;

    let handler = StockHandler::new(Arc::new(FlakyProducts::new(products.clone(), 1)));
    let body = stock_body(product_id, 3, StockOperation::Decrement);

    assert_eq!(process_delivery(&handler, "stock.decrement", &body).await, Disposition::Requeue);
    assert_eq!(products.stock(product_id).await.unwrap(), 10);

    assert_eq!(process_delivery(&handler, "stock.decrement", &body).await, Disposition::Ack);
    assert_eq!(products.stock(product_id).await.unwrap(), 7);
}

#[tokio::test]
async fn increment_adds_to_stock() {
    let products = Arc::new(InMemoryProducts::default());
    let product_id = Uuid::new_v4();
    products.set_stock(product_id, 2).await;

    let handler = StockHandler::new(products.clone());
    let body = stock_body(product_id, 5, StockOperation::Increment);

    assert_eq!(process_delivery(&handler, "stock.increment", &body).await, Disposition::Ack);
    assert_eq!(products.stock(product_id).await.unwrap(), 7);
}

#[tokio::test]
async fn insufficient_stock_is_rejected_without_change() {
    let products = Arc::new(InMemoryProducts::default());
    let product_id = Uuid::new_v4();
    products.set_stock(product_id, 2).await;

    let handler = StockHandler::new(products.clone());
    let body = stock_body(product_id, 3, StockOperation::Decrement);

    assert_eq!(process_delivery(&handler, "stock.decrement", &body).await, Disposition::Reject);
    assert_eq!(products.stock(product_id).await.unwrap(), 2);
}

#[tokio::test]
async fn unknown_product_and_bad_quantity_are_rejected() {
    let handler = StockHandler::new(Arc::new(InMemoryProducts::default()));

    let unknown = stock_body(Uuid::new_v4(), 1, StockOperation::Increment);
    assert_eq!(process_delivery(&handler, "stock.increment", &unknown).await, Disposition::Reject);

    let zero = stock_body(Uuid::new_v4(), 0, StockOperation::Decrement);
    assert_eq!(process_delivery(&handler, "stock.decrement", &zero).await, Disposition::Reject);
}

#[tokio::test]
async fn unknown_stock_operation_is_malformed() {
    let handler = StockHandler::new(Arc::new(InMemoryProducts::default()));
    let body = serde_json::json!({
        "product_id": Uuid::new_v4(),
        "quantity": 1,
        "operation": "reserve",
    });

    assert_eq!(
        process_delivery(&handler, "stock.reserve", body.to_string().as_bytes()).await,
        Disposition::Reject
    );
}

fn email(address: &str, kind: &str) -> Vec<u8> {
    serde_json::to_vec(&EmailNotificationMessage {
        notification_type: kind.to_string(),
        customer_id: Uuid::new_v4(),
        email: address.to_string(),
        subject: "Hello".to_string(),
        data: HashMap::new(),
    })
    .unwrap()
}

#[tokio::test]
async fn email_dispositions() {
    let handler = EmailHandler::new(Arc::new(LoggingEmailSender));

    assert_eq!(
        process_delivery(&handler, "email.welcome", &email("ana@example.com", "welcome")).await,
        Disposition::Ack
    );
    assert_eq!(
        process_delivery(&handler, "email.welcome", &email("not-an-address", "welcome")).await,
        Disposition::Reject
    );
    assert_eq!(
        process_delivery(&handler, "email.mystery", &email("ana@example.com", "mystery")).await,
        Disposition::Reject
    );
    assert_eq!(
        process_delivery(&handler, "email.welcome", b"[1, 2, 3]").await,
        Disposition::Reject
    );
}

#[derive(Default)]
struct OutageSender {
    attempts: AtomicU32,
}

#[async_trait]
impl EmailSender for OutageSender {
    async fn send(
        &self,
        _to: &str,
        _subject: &str,
        _template: &str,
        _data: &HashMap<String, serde_json::Value>,
    ) -> Result<(), EmailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(EmailError::Unavailable("smtp timeout".into()))
    }
}

#[tokio::test]
async fn mail_provider_outage_is_requeued() {
    let sender = Arc::new(OutageSender::default());
    let handler = EmailHandler::new(sender.clone());

    assert_eq!(
        process_delivery(&handler, "email.renewal", &email("ana@example.com", "renewal")).await,
        Disposition::Requeue
    );
    assert_eq!(sender.attempts.load(Ordering::SeqCst), 1);
}

/// Records subscriptions instead of talking to a broker.
#[derive(Clone, Default)]
struct FakeBus {
    subscribed: Arc<Mutex<Vec<ConsumerSpec>>>,
}

struct NoopHandle;

#[async_trait]
impl ConsumerHandle for NoopHandle {
    async fn start(&self) -> Result<(), MessagingError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), MessagingError> {
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for FakeBus {
    async fn publish<T: serde::Serialize + Send + Sync>(
        &self,
        _routing_key: &str,
        _payload: &T,
    ) -> Result<(), MessagingError> {
        Ok(())
    }
}

#[async_trait]
impl EventBus for FakeBus {
    async fn subscribe<H: MessageHandler>(
        &self,
        spec: ConsumerSpec,
        _handler: Arc<H>,
    ) -> Result<Arc<dyn ConsumerHandle>, MessagingError> {
        self.subscribed.lock().unwrap().push(spec);
        let handle: Arc<dyn ConsumerHandle> = Arc::new(NoopHandle);
        Ok(handle)
    }
}

#[tokio::test]
async fn worker_subscribes_the_three_consumers() {
    let bus = FakeBus::default();
    let handles = start_consumers(&bus, &Collaborators::in_memory()).await.unwrap();
    assert_eq!(handles.len(), 3);

    let specs = bus.subscribed.lock().unwrap().clone();
    let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["subscription-renewal", "email-notification", "stock-update"]);
    let queues: Vec<&str> = specs.iter().map(|s| s.queue.as_str()).collect();
    assert_eq!(queues, vec![RENEWAL_QUEUE, EMAIL_QUEUE, STOCK_QUEUE]);
    assert_eq!(specs[0].bindings, vec!["subscription.renewal"]);
    assert_eq!(specs[1].bindings, vec!["email.*"]);
    assert_eq!(specs[2].bindings, vec!["stock.*"]);
}
