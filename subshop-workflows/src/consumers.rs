use std::sync::Arc;

use subshop_messaging_core::{routing, ConsumerHandle, ConsumerSpec, EventBus, MessagingError};
use tracing::info;

use crate::email::EmailHandler;
use crate::memory::{InMemoryCustomers, InMemoryProducts, InMemorySubscriptions, LoggingEmailSender};
use crate::renewal::RenewalWorkflow;
use crate::repository::{CustomerRepository, EmailSender, ProductRepository, SubscriptionRepository};
use crate::stock::StockHandler;

pub const RENEWAL_QUEUE: &str = "subscription_renewals";
pub const EMAIL_QUEUE: &str = "email_notifications";
pub const STOCK_QUEUE: &str = "stock_updates";

pub fn renewal_consumer() -> ConsumerSpec {
    ConsumerSpec::new("subscription-renewal", RENEWAL_QUEUE, &[routing::SUBSCRIPTION_RENEWAL])
}

pub fn email_consumer() -> ConsumerSpec {
    ConsumerSpec::new("email-notification", EMAIL_QUEUE, &[routing::EMAIL_PATTERN])
}

pub fn stock_consumer() -> ConsumerSpec {
    ConsumerSpec::new("stock-update", STOCK_QUEUE, &[routing::STOCK_PATTERN])
}

#[derive(Clone)]
pub struct Collaborators {
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub email: Arc<dyn EmailSender>,
}

impl Collaborators {
    pub fn in_memory() -> Self {
        Self {
            subscriptions: Arc::new(InMemorySubscriptions::default()),
            products: Arc::new(InMemoryProducts::default()),
            customers: Arc::new(InMemoryCustomers::default()),
            email: Arc::new(LoggingEmailSender),
        }
    }
}

/// Starts the renewal, email and stock consumers on `bus`. Renewal follow-up
/// events are published through the same bus.
pub async fn start_consumers<B>(
    bus: &B,
    deps: &Collaborators,
) -> Result<Vec<Arc<dyn ConsumerHandle>>, MessagingError>
where
    B: EventBus + Clone + 'static,
{
    let renewal = RenewalWorkflow::new(
        Arc::clone(&deps.subscriptions),
        Arc::clone(&deps.customers),
        bus.clone(),
    );

    let handles = vec![
        bus.subscribe(renewal_consumer(), Arc::new(renewal)).await?,
        bus.subscribe(email_consumer(), Arc::new(EmailHandler::new(Arc::clone(&deps.email))))
            .await?,
        bus.subscribe(stock_consumer(), Arc::new(StockHandler::new(Arc::clone(&deps.products))))
            .await?,
    ];
    info!(count = handles.len(), "consumers started");
    Ok(handles)
}
