//! In-memory order book backing the customer-service tools.
//!
//! Tools never reach for global state; they are handed an [`OrderBook`]
//! handle at construction. Cloning the handle shares the same orders.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Fulfilment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub description: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub carrier: String,
    pub tracking_number: String,
    pub last_location: String,
    pub estimated_delivery: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub refund_id: String,
    pub amount_cents: u64,
    pub reason: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub customer: String,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    pub total_cents: u64,
    pub placed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment: Option<Shipment>,
    #[serde(default)]
    pub refunds: Vec<Refund>,
}

impl Order {
    pub fn refunded_cents(&self) -> u64 {
        self.refunds.iter().map(|r| r.amount_cents).sum()
    }
}

/// Why a refund was not issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefundError {
    #[error("Order {0} not found")]
    NotFound(String),

    #[error("Order {order_id} is {status} and cannot be refunded yet")]
    NotRefundable { order_id: String, status: &'static str },

    #[error("Order {0} has already been fully refunded")]
    AlreadyRefunded(String),

    /// Ledger invariant violated; refunds exceed what was paid.
    #[error("Order {order_id} ledger is inconsistent: refunded {refunded_cents} of {total_cents} cents")]
    Inconsistent {
        order_id: String,
        refunded_cents: u64,
        total_cents: u64,
    },
}

/// Shared handle to the order datastore.
#[derive(Clone, Default)]
pub struct OrderBook {
    orders: Arc<RwLock<HashMap<String, Order>>>,
}

impl OrderBook {
    /// An empty order book.
    pub fn new() -> Self {
        Self::default()
    }

    /// An order book seeded with the demo orders `12345`, `67890` and `24680`.
    pub fn demo() -> Self {
        let orders = demo_orders()
            .into_iter()
            .map(|o| (o.order_id.clone(), o))
            .collect();
        Self {
            orders: Arc::new(RwLock::new(orders)),
        }
    }

    pub async fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.read().await.get(order_id).cloned()
    }

    /// Insert or replace an order.
    pub async fn insert(&self, order: Order) {
        self.orders
            .write()
            .await
            .insert(order.order_id.clone(), order);
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    /// Refund the outstanding balance of a delivered order.
    pub async fn refund(&self, order_id: &str, reason: &str) -> Result<Refund, RefundError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| RefundError::NotFound(order_id.to_string()))?;

        let refunded = order.refunded_cents();
        if refunded > order.total_cents {
            return Err(RefundError::Inconsistent {
                order_id: order_id.to_string(),
                refunded_cents: refunded,
                total_cents: order.total_cents,
            });
        }
        if order.status != OrderStatus::Delivered {
            return Err(RefundError::NotRefundable {
                order_id: order_id.to_string(),
                status: order.status.as_str(),
            });
        }
        if refunded == order.total_cents {
            return Err(RefundError::AlreadyRefunded(order_id.to_string()));
        }

        let refund = Refund {
            refund_id: format!("RF-{}", &Uuid::new_v4().simple().to_string()[..8]),
            amount_cents: order.total_cents - refunded,
            reason: reason.to_string(),
            issued_at: Utc::now(),
        };
        order.refunds.push(refund.clone());
        Ok(refund)
    }
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

fn demo_orders() -> Vec<Order> {
    vec![
        Order {
            order_id: "12345".into(),
            customer: "Avery Chen".into(),
            status: OrderStatus::Delivered,
            items: vec![LineItem {
                sku: "HP-200".into(),
                description: "Wireless headphones".into(),
                quantity: 1,
                unit_price_cents: 8_999,
            }],
            total_cents: 8_999,
            placed_at: at(2026, 9, 2),
            shipment: Some(Shipment {
                carrier: "UPS".into(),
                tracking_number: "1Z999AA10123456784".into(),
                last_location: "Delivered, front porch".into(),
                estimated_delivery: day(2026, 9, 6),
            }),
            refunds: Vec::new(),
        },
        Order {
            order_id: "67890".into(),
            customer: "Jordan Patel".into(),
            status: OrderStatus::Shipped,
            items: vec![
                LineItem {
                    sku: "KB-87".into(),
                    description: "Mechanical keyboard".into(),
                    quantity: 1,
                    unit_price_cents: 12_950,
                },
                LineItem {
                    sku: "MP-10".into(),
                    description: "Desk mat".into(),
                    quantity: 2,
                    unit_price_cents: 1_500,
                },
            ],
            total_cents: 15_950,
            placed_at: at(2026, 10, 12),
            shipment: Some(Shipment {
                carrier: "FedEx".into(),
                tracking_number: "7749 1234 5678".into(),
                last_location: "Memphis, TN hub".into(),
                estimated_delivery: day(2026, 10, 20),
            }),
            refunds: Vec::new(),
        },
        Order {
            order_id: "24680".into(),
            customer: "Sam Rivera".into(),
            status: OrderStatus::Processing,
            items: vec![LineItem {
                sku: "CM-4K".into(),
                description: "4K webcam".into(),
                quantity: 1,
                unit_price_cents: 6_400,
            }],
            total_cents: 6_400,
            placed_at: at(2026, 10, 17),
            shipment: None,
            refunds: Vec::new(),
        },
    ]
}

/// Render cents as a dollar amount, e.g. `89.99`.
pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}
