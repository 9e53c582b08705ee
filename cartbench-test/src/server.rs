//! Exposes an in-process fake cart service for use in integration tests.
//!
//! ```
//! use std::time::Duration;
//!
//! use cartbench_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::builder()
//!        .visibility_lag(Duration::from_millis(50))
//!        .start()
//!        .await;
//!    let url = server.url("/health");
//!    // use the URL in tests...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use crate::service::{self, Behavior};

/// An in-process fake of the shopping-cart service.
///
/// It listens on a random available port on localhost and stops when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    behavior: Behavior,
}

impl TestServer {
    /// Starts a well-behaved service.
    pub async fn new() -> Self {
        Self::builder().start().await
    }

    /// Configures a service that misbehaves.
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the URL of the service root, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.socket.port())
    }

    /// The path prefix of the cart resource.
    pub fn prefix(&self) -> &str {
        &self.behavior.prefix
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Builder for a [`TestServer`].
#[derive(Debug, Default)]
pub struct TestServerBuilder {
    behavior: Behavior,
}

impl TestServerBuilder {
    /// Serves carts under `/{prefix}` instead of `/shopping-carts`.
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.behavior.prefix = prefix.trim_matches('/').to_owned();
        self
    }

    /// Delays the visibility of every write to reads by `lag`.
    pub fn visibility_lag(mut self, lag: Duration) -> Self {
        self.behavior.visibility_lag = lag;
        self
    }

    /// Acknowledges every n-th item addition without storing it.
    pub fn lose_every_nth_add(mut self, n: usize) -> Self {
        self.behavior.lose_every_nth_add = Some(n);
        self
    }

    /// Fails every cart creation with `500`.
    pub fn fail_creates(mut self) -> Self {
        self.behavior.fail_creates = true;
        self
    }

    /// Reports the service as unhealthy.
    pub fn unhealthy(mut self) -> Self {
        self.behavior.unhealthy = true;
        self
    }

    /// Returns carts wrapped in a `{"cart": ...}` envelope.
    pub fn wrapped(mut self) -> Self {
        self.behavior.wrapped = true;
        self
    }

    /// Binds a random port and starts serving.
    pub async fn start(self) -> TestServer {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let app = service::router(self.behavior.clone());
        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            handle,
            socket,
            behavior: self.behavior,
        }
    }
}
