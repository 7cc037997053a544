//! Shipment tracking tool.

use async_trait::async_trait;
use cxloop_core::error::ToolError;
use cxloop_core::tool::{FieldKind, FieldSpec, Tool, ToolOutput, ToolSchema};
use serde_json::{Value, json};

use crate::ORDER_ID_PATTERN;
use crate::order_book::OrderBook;

pub struct TrackShipmentTool {
    orders: OrderBook,
}

impl TrackShipmentTool {
    pub fn new(orders: OrderBook) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for TrackShipmentTool {
    fn name(&self) -> &str {
        "track_shipment"
    }

    fn description(&self) -> &str {
        "Track the shipment of an order. Returns the carrier, tracking number, last known location and estimated delivery date."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            FieldSpec::required("order_id", FieldKind::String, "The order number, digits only")
                .with_pattern(ORDER_ID_PATTERN),
        ])
    }

    async fn invoke(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let order_id = arguments["order_id"].as_str().unwrap_or_default();
        let order = self
            .orders
            .get(order_id)
            .await
            .ok_or_else(|| ToolError::recoverable(self.name(), format!("Order {order_id} not found")))?;

        let Some(shipment) = order.shipment else {
            return Err(ToolError::recoverable(
                self.name(),
                format!("Order {order_id} is {} and has not shipped yet", order.status.as_str()),
            ));
        };

        let summary = format!(
            "Order {order_id} ({}) via {}: last seen at {}, estimated delivery {}",
            order.status.as_str(),
            shipment.carrier,
            shipment.last_location,
            shipment.estimated_delivery
        );
        Ok(ToolOutput::new(
            summary,
            json!({
                "order_id": order_id,
                "status": order.status,
                "carrier": shipment.carrier,
                "tracking_number": shipment.tracking_number,
                "last_location": shipment.last_location,
                "estimated_delivery": shipment.estimated_delivery,
            }),
        ))
    }
}
