//! In-memory fakes shared by the unit tests: a scriptable backend and a push
//! connector whose connections are driven from the test body.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::Backend;
use crate::auth::AuthToken;
use crate::channel::{ChannelHub, PushConnection, PushConnector, PushFrame, ReconnectPolicy};
use crate::error::SyncError;
use crate::events::EventBus;
use crate::models::{
    CartId, CartLine, CartUpsert, Order, OrderId, OrderStatus, StatusUpdate,
};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchCart,
    Upsert(CartUpsert),
    Remove(CartId),
    PlaceOrder,
    FetchMyOrders,
    FetchStaffOrders,
    UpdateStatus(StatusUpdate),
}

#[derive(Default)]
struct BackendState {
    cart: Vec<CartLine>,
    orders: Vec<Order>,
    calls: Vec<Call>,
    next_cart_id: CartId,
    next_order_id: OrderId,
    fail_writes: Vec<SyncError>,
    fail_fetches: Vec<SyncError>,
    write_delay: Duration,
    writes_in_flight: HashMap<i64, usize>,
    max_writes_in_flight: usize,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            state.next_cart_id = 100;
            state.next_order_id = 500;
        }
        backend
    }

    pub fn with_cart(lines: Vec<CartLine>) -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().cart = lines;
        backend
    }

    pub fn with_orders(orders: Vec<Order>) -> Self {
        let backend = Self::new();
        backend.state.lock().unwrap().orders = orders;
        backend
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Upsert(_) | Call::Remove(_) | Call::UpdateStatus(_)))
            .collect()
    }

    pub fn count(&self, call: fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| call(c)).count()
    }

    pub fn fail_next_write(&self, err: SyncError) {
        self.state.lock().unwrap().fail_writes.push(err);
    }

    pub fn fail_next_fetch(&self, err: SyncError) {
        self.state.lock().unwrap().fail_fetches.push(err);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().unwrap().write_delay = delay;
    }

    pub fn max_writes_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_writes_in_flight
    }

    /// Server-side change made by someone else (another kiosk, staff).
    pub fn set_server_quantity(&self, cart_id: CartId, quantity: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(line) = state.cart.iter_mut().find(|l| l.cart_id == cart_id) {
            line.quantity = quantity;
        }
    }

    pub fn server_quantity(&self, cart_id: CartId) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state
            .cart
            .iter()
            .find(|l| l.cart_id == cart_id)
            .map(|l| l.quantity)
    }

    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        let state = self.state.lock().unwrap();
        state
            .orders
            .iter()
            .find(|o| o.order_id == order_id)
            .map(|o| o.order_status)
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn take_fetch_failure(&self) -> Option<SyncError> {
        let mut state = self.state.lock().unwrap();
        (!state.fail_fetches.is_empty()).then(|| state.fail_fetches.remove(0))
    }

    async fn write<F>(&self, key: i64, apply: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut BackendState),
    {
        let delay = {
            let mut state = self.state.lock().unwrap();
            let in_flight = state.writes_in_flight.entry(key).or_insert(0);
            *in_flight += 1;
            let current = *in_flight;
            state.max_writes_in_flight = state.max_writes_in_flight.max(current);
            state.write_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(in_flight) = state.writes_in_flight.get_mut(&key) {
            *in_flight -= 1;
        }
        if !state.fail_writes.is_empty() {
            return Err(state.fail_writes.remove(0));
        }
        apply(&mut state);
        Ok(())
    }
}

impl Backend for FakeBackend {
    async fn fetch_cart(&self) -> Result<Vec<CartLine>, SyncError> {
        self.record(Call::FetchCart);
        if let Some(err) = self.take_fetch_failure() {
            return Err(err);
        }
        Ok(self.state.lock().unwrap().cart.clone())
    }

    async fn upsert_cart_line(&self, body: CartUpsert) -> Result<(), SyncError> {
        self.record(Call::Upsert(body.clone()));
        self.write(body.product_id, move |state| {
            if let Some(line) = state
                .cart
                .iter_mut()
                .find(|l| l.product_id == body.product_id && !l.ordered)
            {
                line.quantity = body.quantity;
                return;
            }
            state.next_cart_id += 1;
            let cart_id = state.next_cart_id;
            state.cart.push(line(cart_id, body.product_id, body.quantity, body.price));
        })
        .await
    }

    async fn remove_cart_line(&self, cart_id: CartId) -> Result<(), SyncError> {
        self.record(Call::Remove(cart_id));
        let product_id = {
            let state = self.state.lock().unwrap();
            state
                .cart
                .iter()
                .find(|l| l.cart_id == cart_id)
                .map(|l| l.product_id)
                .unwrap_or(-cart_id)
        };
        self.write(product_id, move |state| {
            state.cart.retain(|l| l.cart_id != cart_id);
        })
        .await
    }

    async fn place_order(&self) -> Result<(), SyncError> {
        self.record(Call::PlaceOrder);
        let mut state = self.state.lock().unwrap();
        if let Some(err) = (!state.fail_writes.is_empty()).then(|| state.fail_writes.remove(0)) {
            return Err(err);
        }
        if state.cart.is_empty() {
            return Err(SyncError::Server {
                status: 400,
                message: "Unable to place order, please try again later".into(),
            });
        }
        state.next_order_id += 1;
        let order_id = state.next_order_id;
        let mut lines = std::mem::take(&mut state.cart);
        for l in &mut lines {
            l.order_id = order_id;
            l.ordered = true;
        }
        state.orders.push(order(order_id, OrderStatus::Pending, lines));
        Ok(())
    }

    async fn fetch_my_orders(&self) -> Result<Vec<Order>, SyncError> {
        self.record(Call::FetchMyOrders);
        if let Some(err) = self.take_fetch_failure() {
            return Err(err);
        }
        Ok(self.state.lock().unwrap().orders.clone())
    }

    async fn fetch_staff_orders(&self) -> Result<Vec<Order>, SyncError> {
        self.record(Call::FetchStaffOrders);
        if let Some(err) = self.take_fetch_failure() {
            return Err(err);
        }
        Ok(self.state.lock().unwrap().orders.clone())
    }

    async fn update_order_status(&self, update: StatusUpdate) -> Result<(), SyncError> {
        self.record(Call::UpdateStatus(update.clone()));
        self.write(update.order_id, move |state| {
            if let Some(o) = state.orders.iter_mut().find(|o| o.order_id == update.order_id) {
                o.order_status = update.order_status;
            }
        })
        .await
    }
}

pub fn line(cart_id: CartId, product_id: i64, quantity: u32, price: f64) -> CartLine {
    CartLine {
        cart_id,
        order_id: 0,
        product_id,
        product_name: format!("Product {product_id}"),
        category: "Meals".to_string(),
        size: None,
        unit_price: price,
        quantity,
        date_added: None,
        ordered: false,
        email: Some("student@school.edu".to_string()),
        product_image: None,
    }
}

pub fn order(order_id: OrderId, status: OrderStatus, lines: Vec<CartLine>) -> Order {
    Order {
        order_id,
        ordered_by: "student@school.edu".to_string(),
        order_status: status,
        lines,
        order_date: None,
        total_cost: None,
    }
}

// ---------------------------------------------------------------------------
// Push connector
// ---------------------------------------------------------------------------

enum ServerFrame {
    Text(String),
    Control,
    Close,
}

#[derive(Default)]
struct ConnectorState {
    refuse_all: bool,
    refuse_next: u32,
    attempts: Vec<Instant>,
    servers: Vec<mpsc::UnboundedSender<ServerFrame>>,
    sent: Vec<String>,
    closed: usize,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_all = refuse;
    }

    pub fn refuse_next(&self, n: u32) {
        self.state.lock().unwrap().refuse_next = n;
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closed_connections(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    fn to_latest(&self, frame: ServerFrame) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = state.servers.last() {
            let _ = tx.send(frame);
        }
    }

    /// Server pushes a message on the most recent connection.
    pub fn push(&self, text: &str) {
        self.to_latest(ServerFrame::Text(text.to_string()));
    }

    pub fn push_control(&self) {
        self.to_latest(ServerFrame::Control);
    }

    /// Server drops the most recent connection.
    pub fn drop_connection(&self) {
        self.to_latest(ServerFrame::Close);
    }
}

pub struct FakeConnection {
    rx: mpsc::UnboundedReceiver<ServerFrame>,
    state: Arc<Mutex<ConnectorState>>,
}

impl PushConnector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, _url: &str) -> Result<FakeConnection, SyncError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(Instant::now());
        if state.refuse_all {
            return Err(SyncError::Network("connection refused".into()));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(SyncError::Network("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.servers.push(tx);
        Ok(FakeConnection {
            rx,
            state: self.state.clone(),
        })
    }
}

impl PushConnection for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.state.lock().unwrap().sent.push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<PushFrame, SyncError>> {
        match self.rx.recv().await? {
            ServerFrame::Text(text) => Some(Ok(PushFrame::Signal(text))),
            ServerFrame::Control => Some(Ok(PushFrame::Control)),
            ServerFrame::Close => None,
        }
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closed += 1;
        self.rx.close();
    }
}

pub fn hub(connector: &FakeConnector, events: &EventBus) -> Arc<ChannelHub> {
    Arc::new(ChannelHub::new(
        connector.clone(),
        "ws://kiosk.test/ws/orders".to_string(),
        AuthToken::new("token-123").unwrap(),
        ReconnectPolicy::new(Duration::from_millis(1_000), Duration::from_millis(10_000), 5),
        events.clone(),
    ))
}
