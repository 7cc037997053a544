//! Order lookup tool: returns status, items and totals for one order.

use async_trait::async_trait;
use cxloop_core::error::ToolError;
use cxloop_core::tool::{FieldKind, FieldSpec, Tool, ToolOutput, ToolSchema};
use serde_json::{Value, json};

use crate::ORDER_ID_PATTERN;
use crate::order_book::{OrderBook, format_cents};

pub struct LookupOrderTool {
    orders: OrderBook,
}

impl LookupOrderTool {
    pub fn new(orders: OrderBook) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for LookupOrderTool {
    fn name(&self) -> &str {
        "lookup_order"
    }

    fn description(&self) -> &str {
        "Look up an order by its numeric order id. Returns the order status, line items, total and refund history."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            FieldSpec::required(
                "order_id",
                FieldKind::String,
                "The order number, digits only (e.g. 12345)",
            )
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

        tracing::debug!(order_id, status = order.status.as_str(), "Order looked up");

        let summary = format!(
            "Order {} for {} is {} (total ${}, {} item(s))",
            order.order_id,
            order.customer,
            order.status.as_str(),
            format_cents(order.total_cents),
            order.items.len()
        );
        let data = json!({
            "order_id": order.order_id,
            "customer": order.customer,
            "status": order.status,
            "items": order.items,
            "total": format_cents(order.total_cents),
            "refunded": format_cents(order.refunded_cents()),
            "placed_at": order.placed_at,
        });
        Ok(ToolOutput::new(summary, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxloop_core::error::Severity;

    #[tokio::test]
    async fn lookup_existing_order() {
        let tool = LookupOrderTool::new(OrderBook::demo());
        let out = tool.invoke(json!({"order_id": "12345"})).await.unwrap();
        assert!(out.summary.contains("delivered"));
        assert_eq!(out.data["total"], "89.99");
        assert_eq!(out.data["status"], "delivered");
    }

    #[tokio::test]
    async fn lookup_missing_order_is_recoverable() {
        let tool = LookupOrderTool::new(OrderBook::demo());
        let err = tool.invoke(json!({"order_id": "99999"})).await.unwrap_err();
        assert_eq!(err.severity(), Severity::Recoverable);
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn schema_constrains_order_id() {
        let tool = LookupOrderTool::new(OrderBook::new());
        let schema = tool.schema();
        let field = schema.field("order_id").unwrap();
        assert!(field.required);
        assert_eq!(field.pattern.as_deref(), Some(ORDER_ID_PATTERN));
    }
}
