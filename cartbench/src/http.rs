//! Contains a remote implementation using HTTP to interact with the shopping-cart service.
//!
//! [`HttpRemote`] is the operation executor: every call returns an [`OutcomeRecord`] describing
//! the call, regardless of whether it succeeded. Transport failures and unexpected statuses are
//! data, never errors. The executor holds no mutable state and can be shared between tasks.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::config::Target;
use crate::error::{Error, Result};
use crate::outcome::{Operation, OutcomeRecord};
use crate::timer::timed;

const USER_AGENT: &str = concat!("cartbench/", env!("CARGO_PKG_VERSION"));

/// Payload to create a cart.
#[derive(Clone, Debug, serde::Serialize)]
pub struct NewCart {
    pub customer_id: String,
    pub email: String,
    pub full_name: String,
}

impl NewCart {
    /// Creates a synthetic customer, unique for the given tag and sequence number.
    pub fn synthetic(tag: &str, seq: usize) -> Self {
        Self {
            customer_id: format!("{tag}-customer-{seq}"),
            email: format!("{tag}{seq}@cartbench.test"),
            full_name: format!("{tag} user {seq}"),
        }
    }
}

/// Payload to add an item to a cart.
#[derive(Clone, Debug, serde::Serialize)]
pub struct NewItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub price_per_unit: f64,
}

#[derive(Debug, serde::Serialize)]
struct QuantityUpdate {
    quantity: u32,
}

/// Identifier of an item within a cart.
///
/// Some backends hand out numeric identifiers, others opaque strings.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    /// A numeric identifier, such as an auto-increment key.
    Number(i64),
    /// An opaque string identifier.
    Text(String),
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(id) => write!(f, "{id}"),
            ItemId::Text(id) => f.write_str(id),
        }
    }
}

/// The state of a cart as returned by a read.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub cart_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub item_count: Option<u64>,
}

impl Cart {
    /// The number of items the service reports for this cart.
    ///
    /// Prefers the explicit `item_count` field and falls back to the number of returned items.
    pub fn observed_item_count(&self) -> u64 {
        self.item_count.unwrap_or(self.items.len() as u64)
    }

    /// Returns `true` if an item with the given product identifier is in the cart.
    pub fn contains_product(&self, product_id: &str) -> bool {
        self.items.iter().any(|item| item.product_id == product_id)
    }
}

/// A single line of a cart.
#[derive(Clone, Debug, Deserialize)]
pub struct CartItem {
    #[serde(default)]
    pub item_id: Option<ItemId>,
    pub product_id: String,
    #[serde(default)]
    pub quantity: u32,
}

/// Some backends nest the cart in a `cart` field, others return it at the top level.
#[derive(Deserialize)]
#[serde(untagged)]
enum CartEnvelope {
    Wrapped { cart: Cart },
    Bare(Cart),
}

impl From<CartEnvelope> for Cart {
    fn from(envelope: CartEnvelope) -> Self {
        match envelope {
            CartEnvelope::Wrapped { cart } | CartEnvelope::Bare(cart) => cart,
        }
    }
}

#[derive(Deserialize)]
struct CreatedCart {
    cart_id: String,
}

#[derive(Deserialize)]
struct AddedItem {
    #[serde(default)]
    item_id: Option<ItemId>,
}

/// A remote implementation using HTTP to interact with the shopping-cart service.
#[derive(Clone, Debug)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    carts_url: String,
}

impl HttpRemote {
    /// Creates a new `HttpRemote` for the given target.
    ///
    /// Every call carries `timeout`. A call that times out is recorded as a transport failure and
    /// is never retried here.
    pub fn new(target: &Target, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let base_url = target.base_url.trim_end_matches('/').to_owned();
        let cart_path = target.cart_path.trim_matches('/');
        let carts_url = format!("{base_url}/{cart_path}");

        Ok(Self {
            client,
            base_url,
            carts_url,
        })
    }

    fn cart_url(&self, cart_id: &str) -> String {
        format!("{}/{cart_id}", self.carts_url)
    }

    /// Checks that the service is reachable and reports itself healthy.
    pub async fn health(&self, timeout: Duration) -> Result<()> {
        let url = format!("{}/health", self.base_url);

        tracing::debug!("sending healthcheck request to {}", url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|source| Error::Unreachable {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Unhealthy { url, status });
        }

        tracing::info!(%url, "service is healthy");
        Ok(())
    }

    /// Creates a cart, returning its identifier on success.
    pub async fn create_cart(&self, cart: &NewCart) -> (OutcomeRecord, Option<String>) {
        let request = self.client.post(&self.carts_url).json(cart);
        let (record, created) = self
            .execute::<CreatedCart>(Operation::CreateCart, request)
            .await;
        (record, created.map(|c| c.cart_id))
    }

    /// Adds an item to a cart, returning the item's identifier if the service provides one.
    pub async fn add_item(&self, cart_id: &str, item: &NewItem) -> (OutcomeRecord, Option<ItemId>) {
        let url = format!("{}/items", self.cart_url(cart_id));
        let request = self.client.post(url).json(item);
        let (record, added) = self.execute::<AddedItem>(Operation::AddItem, request).await;
        (record, added.and_then(|a| a.item_id))
    }

    /// Sets the quantity of an item in a cart.
    pub async fn update_item(
        &self,
        cart_id: &str,
        item_id: &ItemId,
        quantity: u32,
    ) -> OutcomeRecord {
        let url = format!("{}/items/{item_id}", self.cart_url(cart_id));
        let request = self.client.put(url).json(&QuantityUpdate { quantity });
        self.execute::<IgnoredAny>(Operation::UpdateItem, request)
            .await
            .0
    }

    /// Removes an item from a cart.
    pub async fn remove_item(&self, cart_id: &str, item_id: &ItemId) -> OutcomeRecord {
        let url = format!("{}/items/{item_id}", self.cart_url(cart_id));
        let request = self.client.delete(url);
        self.execute::<IgnoredAny>(Operation::RemoveItem, request)
            .await
            .0
    }

    /// Checks out a cart.
    pub async fn checkout(&self, cart_id: &str) -> OutcomeRecord {
        let url = format!("{}/checkout", self.cart_url(cart_id));
        let request = self.client.post(url);
        self.execute::<IgnoredAny>(Operation::Checkout, request)
            .await
            .0
    }

    /// Reads a cart with all of its items.
    pub async fn get_cart(&self, cart_id: &str) -> (OutcomeRecord, Option<Cart>) {
        let request = self.client.get(self.cart_url(cart_id));
        let (record, envelope) = self
            .execute::<CartEnvelope>(Operation::GetCart, request)
            .await;
        (record, envelope.map(Cart::from))
    }

    /// Issues a request and classifies its outcome.
    ///
    /// The latency covers sending the request and receiving the full response body. A failure
    /// while receiving the body, including the timeout, is a transport failure like a failure to
    /// connect. The body is only decoded when the status matches the operation's expectation.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: Operation,
        request: reqwest::RequestBuilder,
    ) -> (OutcomeRecord, Option<T>) {
        let (result, latency) = timed(async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .await;

        let (status, body) = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    %operation,
                    ?latency,
                    error = &err as &dyn std::error::Error,
                    "transport failure"
                );
                return (OutcomeRecord::transport_failure(operation, latency), None);
            }
        };

        let record = OutcomeRecord::from_status(operation, latency, status);
        tracing::debug!(
            %operation,
            status = status.as_u16(),
            ?latency,
            succeeded = record.succeeded(),
            "operation completed"
        );

        if !record.succeeded() {
            return (record, None);
        }

        let parsed = match serde_json::from_slice(&body) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(
                    %operation,
                    error = &err as &dyn std::error::Error,
                    "unexpected response body"
                );
                None
            }
        };

        (record, parsed)
    }
}
