mod connection;
mod consumer;
mod options;
mod rabbit_event_bus;

pub use connection::RabbitConnection;
pub use consumer::RabbitConsumer;
pub use options::{dlq_queue, RabbitMqOptions};
pub use rabbit_event_bus::RabbitEventBus;
