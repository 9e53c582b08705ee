//! A fake shopping-cart service with switchable misbehavior.
//!
//! The service keeps carts in memory. By default it is strongly consistent and answers every
//! request correctly. [`Behavior`] makes it lag, lose writes, or fail in specific ways, so tests can
//! observe how the benchmark reports such conditions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

/// Switches for the fake service.
#[derive(Clone, Debug)]
pub struct Behavior {
    /// Path prefix of the cart resource, without slashes.
    pub prefix: String,
    /// Time after a write until reads reflect it.
    pub visibility_lag: Duration,
    /// Acknowledge but drop every n-th item addition.
    pub lose_every_nth_add: Option<usize>,
    /// Reject every cart creation with a server error.
    pub fail_creates: bool,
    /// Answer the health endpoint with `503`.
    pub unhealthy: bool,
    /// Wrap cart responses in a `{"cart": ...}` envelope.
    pub wrapped: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            prefix: "shopping-carts".into(),
            visibility_lag: Duration::ZERO,
            lose_every_nth_add: None,
            fail_creates: false,
            unhealthy: false,
            wrapped: false,
        }
    }
}

#[derive(Debug)]
struct StoredItem {
    item_id: i64,
    product_id: String,
    quantity: u32,
    written: Instant,
}

#[derive(Debug)]
struct StoredCart {
    customer_id: String,
    status: &'static str,
    written: Instant,
    items: Vec<StoredItem>,
}

#[derive(Debug, Default)]
struct Counters {
    adds: AtomicUsize,
    next_item_id: AtomicI64,
}

#[derive(Clone, Debug)]
struct ServiceState {
    behavior: Arc<Behavior>,
    carts: Arc<Mutex<BTreeMap<String, StoredCart>>>,
    counters: Arc<Counters>,
}

impl ServiceState {
    fn is_visible(&self, written: Instant) -> bool {
        written.elapsed() >= self.behavior.visibility_lag
    }
}

#[derive(Debug, Deserialize)]
struct NewCart {
    customer_id: String,
}

#[derive(Debug, Deserialize)]
struct NewItem {
    product_id: String,
    quantity: u32,
}

#[derive(Debug, Deserialize)]
struct QuantityUpdate {
    quantity: u32,
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{what} not found") }))).into_response()
}

async fn health(State(state): State<ServiceState>) -> Response {
    if state.behavior.unhealthy {
        let body = json!({ "status": "unhealthy" });
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }
    Json(json!({ "status": "healthy" })).into_response()
}

async fn create_cart(State(state): State<ServiceState>, Json(cart): Json<NewCart>) -> Response {
    if state.behavior.fail_creates {
        let body = json!({ "error": "database unavailable" });
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
    }

    let cart_id = uuid::Uuid::new_v4().to_string();
    state.carts.lock().unwrap().insert(
        cart_id.clone(),
        StoredCart {
            customer_id: cart.customer_id.clone(),
            status: "OPEN",
            written: Instant::now(),
            items: Vec::new(),
        },
    );

    let body = json!({ "cart_id": cart_id, "customer_id": cart.customer_id, "status": "OPEN" });
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn get_cart(State(state): State<ServiceState>, Path(cart_id): Path<String>) -> Response {
    let carts = state.carts.lock().unwrap();
    let Some(cart) = carts.get(&cart_id).filter(|c| state.is_visible(c.written)) else {
        return not_found("cart");
    };

    let items: Vec<_> = cart
        .items
        .iter()
        .filter(|item| state.is_visible(item.written))
        .map(|item| {
            json!({
                "item_id": item.item_id,
                "product_id": item.product_id,
                "quantity": item.quantity,
            })
        })
        .collect();

    let body = json!({
        "cart_id": cart_id,
        "customer_id": cart.customer_id,
        "status": cart.status,
        "item_count": items.len(),
        "items": items,
    });
    let body = if state.behavior.wrapped {
        json!({ "cart": body })
    } else {
        body
    };
    Json(body).into_response()
}

async fn add_item(
    State(state): State<ServiceState>,
    Path(cart_id): Path<String>,
    Json(item): Json<NewItem>,
) -> Response {
    let seq = state.counters.adds.fetch_add(1, Ordering::SeqCst) + 1;
    let item_id = state.counters.next_item_id.fetch_add(1, Ordering::SeqCst) + 1;

    let mut carts = state.carts.lock().unwrap();
    let Some(cart) = carts.get_mut(&cart_id) else {
        return not_found("cart");
    };

    let lost = state
        .behavior
        .lose_every_nth_add
        .is_some_and(|n| n > 0 && seq % n == 0);
    if !lost {
        cart.items.push(StoredItem {
            item_id,
            product_id: item.product_id,
            quantity: item.quantity,
            written: Instant::now(),
        });
    }

    (StatusCode::CREATED, Json(json!({ "item_id": item_id }))).into_response()
}

async fn update_item(
    State(state): State<ServiceState>,
    Path((cart_id, item_id)): Path<(String, i64)>,
    Json(update): Json<QuantityUpdate>,
) -> Response {
    let mut carts = state.carts.lock().unwrap();
    let Some(cart) = carts.get_mut(&cart_id) else {
        return not_found("cart");
    };
    let Some(item) = cart.items.iter_mut().find(|item| item.item_id == item_id) else {
        return not_found("item");
    };

    item.quantity = update.quantity;
    Json(json!({ "item_id": item_id, "quantity": update.quantity })).into_response()
}

async fn remove_item(
    State(state): State<ServiceState>,
    Path((cart_id, item_id)): Path<(String, i64)>,
) -> Response {
    let mut carts = state.carts.lock().unwrap();
    let Some(cart) = carts.get_mut(&cart_id) else {
        return not_found("cart");
    };
    let Some(index) = cart.items.iter().position(|item| item.item_id == item_id) else {
        return not_found("item");
    };

    cart.items.remove(index);
    Json(json!({ "removed": item_id })).into_response()
}

async fn checkout(State(state): State<ServiceState>, Path(cart_id): Path<String>) -> Response {
    let mut carts = state.carts.lock().unwrap();
    let Some(cart) = carts.get_mut(&cart_id) else {
        return not_found("cart");
    };

    cart.status = "CHECKED_OUT";
    Json(json!({ "cart_id": cart_id, "status": cart.status })).into_response()
}

/// Builds the router of the fake service.
pub fn router(behavior: Behavior) -> Router {
    let prefix = behavior.prefix.trim_matches('/').to_owned();
    let state = ServiceState {
        behavior: Arc::new(behavior),
        carts: Default::default(),
        counters: Default::default(),
    };

    Router::new()
        .route("/health", get(health))
        .route(&format!("/{prefix}"), post(create_cart))
        .route(&format!("/{prefix}/{{cart_id}}"), get(get_cart))
        .route(&format!("/{prefix}/{{cart_id}}/items"), post(add_item))
        .route(
            &format!("/{prefix}/{{cart_id}}/items/{{item_id}}"),
            put(update_item).delete(remove_item),
        )
        .route(&format!("/{prefix}/{{cart_id}}/checkout"), post(checkout))
        .with_state(state)
}

