pub mod backoff;
pub mod bus;
pub mod error;
pub mod handler;
pub mod pool;
pub mod registry;
pub mod shutdown;
pub mod supervisor;
pub mod types;

pub use backoff::{Backoff, BackoffPolicy};
pub use bus::{ConsumerSpec, EventBus, EventPublisher};
pub use error::{MessagingError, ProcessingError};
pub use handler::{process_delivery, Disposition, MessageHandler};
pub use pool::{ChannelPool, ChannelSource, PooledChannel};
pub use registry::{ConsumerHandle, ConsumerRegistry, ConsumerState};
pub use shutdown::Shutdown;
pub use supervisor::{ConnectionLost, ConnectionState, ConnectionStatus, Connector, Supervisor};
pub use types::{
    routing, EmailNotificationMessage, Envelope, RoutedMessage, StockOperation, StockUpdateMessage,
    SubscriptionRenewalMessage, SubscriptionStatus, SubscriptionStatusChangeMessage,
};
