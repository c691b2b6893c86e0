//! Remote metric store adapters.
//!
//! The store supports a paged newest-first query and a change-event
//! subscription, both scoped to one user. Adapters implement
//! [`RemoteSource`]; the sync layer consumes it without knowing the
//! transport.

pub mod memory;
pub mod types;

#[cfg(feature = "remote")]
pub mod rest;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Re-export commonly used types
pub use memory::MemorySource;
pub use types::{
    ChangeEvent, ChangeKind, MalformedPayload, Metric, MetricRecord, NewRecord, RawChangeEvent,
    RawRecord, RecordId, UserId,
};

#[cfg(feature = "remote")]
pub use rest::{RestClient, RestConfig, RestSource};

/// Callback the adapter invokes for every change notification.
///
/// It may be called from any thread the adapter owns.
pub type EventSink = Box<dyn Fn(RawChangeEvent) + Send + Sync + 'static>;

/// Access to the remote metric store.
pub trait RemoteSource {
    /// Fetch up to `limit` of the user's records, newest first.
    fn fetch_recent(&self, user_id: &UserId, limit: usize)
        -> Result<Vec<MetricRecord>, FetchError>;

    /// Start delivering the user's change events to `sink`.
    ///
    /// Scoping is best effort; consumers must still check ownership.
    fn subscribe(&self, user_id: &UserId, sink: EventSink)
        -> Result<SubscriptionHandle, FetchError>;

    /// Stop a subscription. Releasing a handle twice is a no-op.
    fn unsubscribe(&self, handle: &SubscriptionHandle);
}

/// Token for an open subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: u64,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Mark the subscription released. Returns `true` only the first time.
    pub fn release(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }
}

/// Errors from the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Network/HTTP transport error
    Network(String),
    /// The store returned an error response
    Server { status: u16, message: String },
    /// The response body could not be decoded
    Decode(String),
    /// The store is unreachable or refused the request
    Unavailable(String),
    /// Adapter configuration error
    Config(String),
}

impl FetchError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Unavailable(_) => true,
            FetchError::Server { status, .. } => *status >= 500 || *status == 429,
            FetchError::Decode(_) | FetchError::Config(_) => false,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "Store network error: {msg}"),
            FetchError::Server { status, message } => {
                write!(f, "Store server error ({status}): {message}")
            }
            FetchError::Decode(msg) => write!(f, "Store decode error: {msg}"),
            FetchError::Unavailable(msg) => write!(f, "Store unavailable: {msg}"),
            FetchError::Config(msg) => write!(f, "Store config error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_release_is_idempotent() {
        let handle = SubscriptionHandle::new(7);
        let clone = handle.clone();
        assert!(handle.is_active());
        assert!(handle.release());
        assert!(!clone.is_active());
        assert!(!clone.release());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(FetchError::Network("reset".to_string()).is_retryable());
        assert!(FetchError::Server {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!FetchError::Server {
            status: 401,
            message: String::new()
        }
        .is_retryable());
        assert!(!FetchError::Decode("eof".to_string()).is_retryable());
    }
}
