//! Refund tool: refunds the outstanding balance of a delivered order.
//!
//! Business-rule rejections (missing order, not delivered, already
//! refunded) are recoverable. A ledger whose refunds exceed the order total
//! is an internal fault and fails fatally.

use async_trait::async_trait;
use cxloop_core::error::ToolError;
use cxloop_core::tool::{FieldKind, FieldSpec, Tool, ToolOutput, ToolSchema};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::ORDER_ID_PATTERN;
use crate::order_book::{OrderBook, RefundError, format_cents};

pub struct ProcessRefundTool {
    orders: OrderBook,
}

impl ProcessRefundTool {
    pub fn new(orders: OrderBook) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl Tool for ProcessRefundTool {
    fn name(&self) -> &str {
        "process_refund"
    }

    fn description(&self) -> &str {
        "Refund a delivered order in full. Requires the numeric order id and the customer's reason for the refund."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            FieldSpec::required("order_id", FieldKind::String, "The order number, digits only")
                .with_pattern(ORDER_ID_PATTERN),
            FieldSpec::required("reason", FieldKind::String, "Why the customer wants a refund"),
        ])
    }

    async fn invoke(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let order_id = arguments["order_id"].as_str().unwrap_or_default();
        let reason = arguments["reason"].as_str().unwrap_or_default();

        match self.orders.refund(order_id, reason).await {
            Ok(refund) => {
                info!(order_id, refund_id = %refund.refund_id, amount_cents = refund.amount_cents, "Refund issued");
                let summary = format!(
                    "Refund {} of ${} issued for order {order_id}",
                    refund.refund_id,
                    format_cents(refund.amount_cents)
                );
                Ok(ToolOutput::new(
                    summary,
                    json!({
                        "order_id": order_id,
                        "refund_id": refund.refund_id,
                        "amount": format_cents(refund.amount_cents),
                        "reason": refund.reason,
                        "issued_at": refund.issued_at,
                    }),
                ))
            }
            Err(e @ RefundError::Inconsistent { .. }) => {
                warn!(order_id, error = %e, "Refund ledger invariant violated");
                Err(ToolError::fatal(self.name(), e.to_string()))
            }
            Err(e) => Err(ToolError::recoverable(self.name(), e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_book::Refund;
    use chrono::Utc;
    use cxloop_core::error::Severity;

    #[tokio::test]
    async fn refund_delivered_order() {
        let book = OrderBook::demo();
        let tool = ProcessRefundTool::new(book.clone());
        let out = tool
            .invoke(json!({"order_id": "12345", "reason": "arrived broken"}))
            .await
            .unwrap();
        assert_eq!(out.data["amount"], "89.99");
        assert_eq!(book.get("12345").await.unwrap().refunds.len(), 1);
    }

    #[tokio::test]
    async fn business_rule_rejections_are_recoverable() {
        let tool = ProcessRefundTool::new(OrderBook::demo());
        for id in ["99999", "67890", "24680"] {
            let err = tool
                .invoke(json!({"order_id": id, "reason": "x"}))
                .await
                .unwrap_err();
            assert_eq!(err.severity(), Severity::Recoverable, "order {id}");
        }
    }

    #[tokio::test]
    async fn inconsistent_ledger_is_fatal() {
        let book = OrderBook::demo();
        let mut order = book.get("12345").await.unwrap();
        order.refunds.push(Refund {
            refund_id: "RF-dup".into(),
            amount_cents: order.total_cents * 2,
            reason: "double posting".into(),
            issued_at: Utc::now(),
        });
        book.insert(order).await;

        let tool = ProcessRefundTool::new(book);
        let err = tool
            .invoke(json!({"order_id": "12345", "reason": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(err.tool_name(), "process_refund");
    }
}
