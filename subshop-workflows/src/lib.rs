pub mod consumers;
pub mod email;
pub mod error;
pub mod memory;
pub mod renewal;
pub mod repository;
pub mod stock;
pub mod telemetry;

pub use consumers::{start_consumers, Collaborators};
pub use email::EmailHandler;
pub use error::{EmailError, RepositoryError};
pub use renewal::{RenewalOutcome, RenewalWorkflow};
pub use stock::StockHandler;
