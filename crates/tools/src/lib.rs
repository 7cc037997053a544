//! Built-in customer-service tools for cxloop.
//!
//! Every tool is backed by an injected [`OrderBook`] handle, so tests and
//! the server can each supply their own datastore.

pub mod lookup_order;
pub mod order_book;
pub mod process_refund;
pub mod track_shipment;

use cxloop_core::error::RegistryError;
use cxloop_core::tool::ToolRegistry;

pub use lookup_order::LookupOrderTool;
pub use order_book::{Order, OrderBook, OrderStatus, RefundError};
pub use process_refund::ProcessRefundTool;
pub use track_shipment::TrackShipmentTool;

/// Order ids are 4 to 12 digits, nothing else.
pub const ORDER_ID_PATTERN: &str = "^[0-9]{4,12}$";

/// Create a registry with all built-in tools sharing one order book.
pub fn default_registry(orders: OrderBook) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(LookupOrderTool::new(orders.clone())))?;
    registry.register(Box::new(ProcessRefundTool::new(orders.clone())))?;
    registry.register(Box::new(TrackShipmentTool::new(orders)))?;
    Ok(registry)
}
