//! Kiosk backend REST client.
//!
//! [`Backend`] is the seam between the sync core and the network: the stores,
//! the mutation queue and the status guard only ever talk to this trait, so
//! they can be driven by an in-memory fake in tests. [`HttpBackend`] is the
//! production implementation over `reqwest`, authenticated with the session's
//! bearer token.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, warn};

use crate::auth::AuthToken;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{
    CartId, CartLine, CartResponse, CartUpsert, Order, OrdersResponse, StatusUpdate,
};

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Every backend call the sync core makes.
pub trait Backend: Send + Sync + 'static {
    /// `GET /user/cart`
    fn fetch_cart(&self) -> impl Future<Output = Result<Vec<CartLine>, SyncError>> + Send;

    /// `POST /user/cart`
    fn upsert_cart_line(
        &self,
        body: CartUpsert,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// `DELETE /user/cart/{cartId}`
    fn remove_cart_line(
        &self,
        cart_id: CartId,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// `POST /user/order`: turn the open cart into an order.
    fn place_order(&self) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// `GET /user/orders`
    fn fetch_my_orders(&self) -> impl Future<Output = Result<Vec<Order>, SyncError>> + Send;

    /// `GET /staff/orders`
    fn fetch_staff_orders(&self) -> impl Future<Output = Result<Vec<Order>, SyncError>> + Send;

    /// `POST /staff/order`
    fn update_order_status(
        &self,
        update: StatusUpdate,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly error.
fn friendly_error(url: &str, err: &reqwest::Error) -> SyncError {
    if err.is_connect() {
        return SyncError::Network(format!("Cannot reach kiosk server at {url}"));
    }
    if err.is_timeout() {
        return SyncError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return SyncError::Config(format!("Invalid kiosk server URL: {url}"));
    }
    if err.is_decode() {
        return SyncError::Decode(format!("Unreadable response from {url}: {err}"));
    }
    SyncError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-friendly message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session token is invalid or expired".to_string(),
        403 => "Account is not allowed to do that".to_string(),
        404 => "Kiosk server endpoint not found".to_string(),
        s if s >= 500 => format!("Kiosk server error (HTTP {s})"),
        s => format!("Unexpected response from kiosk server (HTTP {s})"),
    }
}

/// Build the error for a non-success response, preserving the server's own
/// `message`/`error` text when the body carries one.
fn status_error(status: StatusCode, body_text: &str) -> SyncError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return SyncError::Auth(status_message(status));
    }

    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("message")
                .or_else(|| json.get("error"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .or_else(|| {
            let trimmed = body_text.trim();
            (!trimmed.is_empty() && trimmed.len() <= 200).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| status_message(status));

    SyncError::Server {
        status: status.as_u16(),
        message,
    }
}

/// The backend may answer HTTP 200 with `{"status": "500", "message": ..}`
/// when the operation failed. Treat a non-2xx `status` in the body as an error.
fn check_ack(value: &Value) -> Result<(), SyncError> {
    let code = match value.get("status") {
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    };
    let Some(code) = code.filter(|c| !(200..300).contains(c)) else {
        return Ok(());
    };
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Err(status_error(status, &value.to_string()))
}

// ---------------------------------------------------------------------------
// HTTP backend
// ---------------------------------------------------------------------------

pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: AuthToken,
}

impl HttpBackend {
    pub fn new(config: &SyncConfig, token: AuthToken) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token,
        })
    }

    /// Perform an authenticated request and return the raw JSON body, or
    /// `Value::Null` for an empty response.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Value, SyncError> {
        let full_url = format!("{}{path}", self.base_url);
        let started = Instant::now();

        let mut req = self
            .client
            .request(method.clone(), &full_url)
            .header("Authorization", self.token.bearer());
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        debug!(
            method = %method,
            path,
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "kiosk api call"
        );

        if !status.is_success() {
            let err = status_error(status, &body_text);
            warn!(method = %method, path, error = %err, "kiosk api call failed");
            return Err(err);
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| SyncError::Decode(format!("Invalid JSON from {path}: {e}")))
    }
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, SyncError> {
    serde_json::from_value(value)
        .map_err(|e| SyncError::Decode(format!("Unexpected payload from {path}: {e}")))
}

fn decode_cart(path: &str, value: Value) -> Result<Vec<CartLine>, SyncError> {
    check_ack(&value)?;
    decode::<CartResponse>(path, value).map(|resp| resp.items)
}

/// `/user/orders` answers with a bare array; `/staff/orders` wraps it in an
/// envelope. Accept either shape from both.
fn decode_orders(path: &str, value: Value) -> Result<Vec<Order>, SyncError> {
    if value.is_array() {
        return decode(path, value);
    }
    check_ack(&value)?;
    decode::<OrdersResponse>(path, value).map(|resp| resp.orders)
}

impl Backend for HttpBackend {
    async fn fetch_cart(&self) -> Result<Vec<CartLine>, SyncError> {
        let path = "/user/cart";
        let value = self.send::<Value>(Method::GET, path, None).await?;
        decode_cart(path, value)
    }

    async fn upsert_cart_line(&self, body: CartUpsert) -> Result<(), SyncError> {
        let ack = self.send(Method::POST, "/user/cart", Some(&body)).await?;
        check_ack(&ack)
    }

    async fn remove_cart_line(&self, cart_id: CartId) -> Result<(), SyncError> {
        let path = format!("/user/cart/{cart_id}");
        let ack = self.send::<Value>(Method::DELETE, &path, None).await?;
        check_ack(&ack)
    }

    async fn place_order(&self) -> Result<(), SyncError> {
        let ack = self.send::<Value>(Method::POST, "/user/order", None).await?;
        check_ack(&ack)
    }

    async fn fetch_my_orders(&self) -> Result<Vec<Order>, SyncError> {
        let path = "/user/orders";
        let value = self.send::<Value>(Method::GET, path, None).await?;
        decode_orders(path, value)
    }

    async fn fetch_staff_orders(&self) -> Result<Vec<Order>, SyncError> {
        let path = "/staff/orders";
        let value = self.send::<Value>(Method::GET, path, None).await?;
        decode_orders(path, value)
    }

    async fn update_order_status(&self, update: StatusUpdate) -> Result<(), SyncError> {
        let ack = self.send(Method::POST, "/staff/order", Some(&update)).await?;
        check_ack(&ack)
    }
}
