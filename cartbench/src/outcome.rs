//! Observations of single operations against the service under test.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Status code recorded when no response was received at all.
pub const TRANSPORT_FAILURE: u16 = 0;

/// The kind of call being measured.
///
/// The serialized names match the `operation` field of run artifacts.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub enum Operation {
    /// Create a new cart.
    #[serde(rename = "create_cart")]
    CreateCart,
    /// Add an item to an existing cart.
    #[serde(rename = "add_items")]
    AddItem,
    /// Change the quantity of an item in a cart.
    #[serde(rename = "update_item")]
    UpdateItem,
    /// Remove an item from a cart.
    #[serde(rename = "remove_item")]
    RemoveItem,
    /// Check out a cart.
    #[serde(rename = "checkout")]
    Checkout,
    /// Read a cart with all of its items.
    #[serde(rename = "get_cart")]
    GetCart,
}

impl Operation {
    /// All operation kinds, in reporting order.
    pub const ALL: [Operation; 6] = [
        Operation::CreateCart,
        Operation::AddItem,
        Operation::UpdateItem,
        Operation::RemoveItem,
        Operation::Checkout,
        Operation::GetCart,
    ];

    /// The status the service documents for a successful call of this kind.
    pub fn expected_status(self) -> StatusCode {
        match self {
            Operation::CreateCart | Operation::AddItem => StatusCode::CREATED,
            Operation::UpdateItem
            | Operation::RemoveItem
            | Operation::Checkout
            | Operation::GetCart => StatusCode::OK,
        }
    }

    /// The name used in artifacts and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::CreateCart => "create_cart",
            Operation::AddItem => "add_items",
            Operation::UpdateItem => "update_item",
            Operation::RemoveItem => "remove_item",
            Operation::Checkout => "checkout",
            Operation::GetCart => "get_cart",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown operation name.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown operation `{0}`")]
pub struct UnknownOperation(String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_owned()))
    }
}

/// One observation of a single operation.
///
/// Records are created once by the executor and never mutated afterwards. A record with
/// [`TRANSPORT_FAILURE`] as its status is never successful.
#[derive(Clone, Debug, PartialEq)]
pub struct OutcomeRecord {
    operation: Operation,
    latency: Duration,
    succeeded: bool,
    status_code: u16,
    observed_at: SystemTime,
}

impl OutcomeRecord {
    /// Records a call that received a response with the given status.
    ///
    /// Success is decided by the operation's expected status.
    pub fn from_status(operation: Operation, latency: Duration, status: StatusCode) -> Self {
        Self {
            operation,
            latency,
            succeeded: status == operation.expected_status(),
            status_code: status.as_u16(),
            observed_at: SystemTime::now(),
        }
    }

    /// Records a call that failed before any response was received.
    pub fn transport_failure(operation: Operation, latency: Duration) -> Self {
        Self {
            operation,
            latency,
            succeeded: false,
            status_code: TRANSPORT_FAILURE,
            observed_at: SystemTime::now(),
        }
    }

    /// Rebuilds a record from persisted fields.
    ///
    /// The success flag is taken as persisted, except that a transport failure is never a
    /// success.
    pub fn restore(
        operation: Operation,
        latency: Duration,
        succeeded: bool,
        status_code: u16,
        observed_at: SystemTime,
    ) -> Self {
        Self {
            operation,
            latency,
            succeeded: succeeded && status_code != TRANSPORT_FAILURE,
            status_code,
            observed_at,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn observed_at(&self) -> SystemTime {
        self.observed_at
    }

    /// Returns `true` if no response was received.
    pub fn is_transport_failure(&self) -> bool {
        self.status_code == TRANSPORT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_follows_expected_status() {
        let latency = Duration::from_millis(3);

        let created = OutcomeRecord::from_status(Operation::CreateCart, latency, StatusCode::CREATED);
        assert!(created.succeeded());

        let ok_create = OutcomeRecord::from_status(Operation::CreateCart, latency, StatusCode::OK);
        assert!(!ok_create.succeeded());

        let found = OutcomeRecord::from_status(Operation::GetCart, latency, StatusCode::OK);
        assert!(found.succeeded());

        let missing = OutcomeRecord::from_status(Operation::GetCart, latency, StatusCode::NOT_FOUND);
        assert!(!missing.succeeded());
        assert_eq!(missing.status_code(), 404);
    }

    #[test]
    fn transport_failures_never_succeed() {
        let record = OutcomeRecord::transport_failure(Operation::AddItem, Duration::from_secs(10));
        assert!(!record.succeeded());
        assert!(record.is_transport_failure());
        assert_eq!(record.latency(), Duration::from_secs(10));

        let restored = OutcomeRecord::restore(
            Operation::AddItem,
            Duration::ZERO,
            true,
            TRANSPORT_FAILURE,
            SystemTime::now(),
        );
        assert!(!restored.succeeded());
    }

    #[test]
    fn names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{op}\""));
        }
        assert!("write_item".parse::<Operation>().is_err());
    }
}
