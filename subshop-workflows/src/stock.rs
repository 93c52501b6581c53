use std::sync::Arc;

use async_trait::async_trait;
use subshop_messaging_core::{MessageHandler, ProcessingError, StockOperation, StockUpdateMessage};
use tracing::{info, instrument};

use crate::error::RepositoryError;
use crate::repository::ProductRepository;

/// Applies `stock.*` updates to product inventory.
pub struct StockHandler {
    products: Arc<dyn ProductRepository>,
}

impl StockHandler {
    pub fn new(products: Arc<dyn ProductRepository>) -> Self {
        Self { products }
    }
}

#[async_trait]
impl MessageHandler for StockHandler {
    type Message = StockUpdateMessage;

    #[instrument(skip_all, fields(product_id = %message.product_id, operation = message.operation.as_str(), quantity = message.quantity))]
    async fn handle(&self, message: StockUpdateMessage) -> Result<(), ProcessingError> {
        if message.quantity <= 0 {
            return Err(ProcessingError::permanent(format!(
                "invalid stock quantity {}",
                message.quantity
            )));
        }

        let level = match message.operation {
            StockOperation::Increment => {
                self.products
                    .increment_stock(message.product_id, message.quantity)
                    .await?
            }
            StockOperation::Decrement => {
                let available = self.products.stock(message.product_id).await?;
                if available < message.quantity {
                    return Err(RepositoryError::Validation(format!(
                        "insufficient stock: {} available, {} requested",
                        available, message.quantity
                    ))
                    .into());
                }
                self.products
                    .decrement_stock(message.product_id, message.quantity)
                    .await?
            }
        };

        info!(stock = level, "stock updated");
        Ok(())
    }
}
