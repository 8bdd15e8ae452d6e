//! Console sink (spec.md §4.5.1): one JSON object per line on stdout.
//! Grounded in `app/handlers/console.py`'s `ConsoleOutputHandler`.

use async_trait::async_trait;

use crate::error::SinkError;
use crate::product::Product;

use super::OutputHandler;

#[derive(Debug, Default)]
pub struct ConsoleHandler;

#[async_trait]
impl OutputHandler for ConsoleHandler {
    async fn start_handler(&self) -> Result<(), SinkError> {
        log::info!("console output handler starting");
        Ok(())
    }

    async fn stop_handler(&self) {
        log::info!("console output handler stopping");
    }

    async fn publish(&self, product: &Product) -> Result<(), SinkError> {
        println!("{}", product.body_json);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn handler_type(&self) -> &'static str {
        "console"
    }
}
