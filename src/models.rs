//! Wire and domain types shared by the stores, the queue and the guard.
//!
//! Field names follow the backend's camelCase JSON. The backend has shipped
//! several spellings for the same field over time (`oblist` vs `items`,
//! `products` vs `lines`, `auth_TOKEN` vs `AUTH_TOKEN`), so decoding accepts
//! every known alias while encoding always uses the canonical name.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub type CartId = i64;
pub type OrderId = i64;

// ---------------------------------------------------------------------------
// Cart lines
// ---------------------------------------------------------------------------

/// One product row in a cart (or inside a placed order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub cart_id: CartId,
    #[serde(default)]
    pub order_id: OrderId,
    pub product_id: i64,
    #[serde(default)]
    pub product_name: String,
    #[serde(default, alias = "productCategory")]
    pub category: String,
    #[serde(default, alias = "productSize")]
    pub size: Option<String>,
    #[serde(alias = "price")]
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(
        default,
        deserialize_with = "deserialize_flexible_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_added: Option<DateTime<Utc>>,
    #[serde(default, alias = "isOrdered")]
    pub ordered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_image: Option<String>,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order lifecycle. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "COMPLETED" => Ok(OrderStatus::Completed),
            // Both spellings show up in older rows.
            "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: OrderId,
    #[serde(default, alias = "orderBy", alias = "email")]
    pub ordered_by: String,
    pub order_status: OrderStatus,
    #[serde(default, alias = "products", alias = "items")]
    pub lines: Vec<CartLine>,
    #[serde(
        default,
        deserialize_with = "deserialize_flexible_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub order_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

impl Order {
    /// Server-computed total when present, otherwise the sum of the lines.
    pub fn total(&self) -> f64 {
        self.total_cost
            .unwrap_or_else(|| self.lines.iter().map(CartLine::line_total).sum())
    }
}

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "oblist")]
    pub items: Vec<CartLine>,
    #[serde(default, alias = "authToken", alias = "AUTH_TOKEN", alias = "auth_TOKEN")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrdersResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "orderlist")]
    pub orders: Vec<Order>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body of `POST /user/cart`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartUpsert {
    pub product_id: i64,
    pub quantity: u32,
    pub price: f64,
    pub ordered: bool,
}

impl CartUpsert {
    pub fn for_line(line: &CartLine, quantity: u32) -> Self {
        Self {
            product_id: line.product_id,
            quantity,
            price: line.unit_price,
            ordered: false,
        }
    }
}

/// Body of `POST /staff/order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub order_id: OrderId,
    pub email: String,
    pub order_status: OrderStatus,
}

// ---------------------------------------------------------------------------
// Date decoding
// ---------------------------------------------------------------------------

/// Accepts epoch milliseconds, RFC 3339 strings, or null.
fn deserialize_flexible_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| parse_date_value(&value)))
}

fn parse_date_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    if let Some(ms) = value.as_i64() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    let s = value.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Jackson's default offset format: 2024-05-01T08:30:00.000+0000
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
