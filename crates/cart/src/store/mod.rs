//! Realtime store collaborator.
//!
//! # Architecture
//!
//! The cart lives in a keyed, hierarchical JSON store (Firebase Realtime
//! Database style):
//!
//! - `carts/{userId}` - the user's cart collection
//! - `carts/{userId}/{itemId}` - a single line item
//!
//! The cart core depends on exactly four primitives, captured by the
//! [`RemoteStore`] trait: subscribe, write-merge, push and delete. A
//! subscription delivers the full value at its path every time anything under
//! it changes, never a delta.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - in-process store with realtime fan-out, used by tests
//!   and demos
//! - [`RealtimeStore`] - REST + server-sent-events client for a hosted
//!   realtime database

mod memory;
mod realtime;
mod sse;
pub mod tree;

pub use memory::{MemoryStore, StoreOp};
pub use realtime::RealtimeStore;

use core::fmt;
use std::future::Future;

use pocketshop_core::{LineItemId, UserId};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Root collection holding every user's cart.
pub const CARTS_ROOT: &str = "carts";

/// Errors that can occur when talking to the realtime store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The store answered with a non-success status.
    #[error("Rejected by store ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error text returned by the store.
        message: String,
    },

    /// The store cancelled the subscription (permissions changed or the
    /// credential was revoked).
    #[error("Subscription cancelled: {0}")]
    Cancelled(String),

    /// The event stream ended.
    #[error("Subscription stream closed")]
    Closed,

    /// A path segment is not a valid key.
    #[error("Invalid path segment: {0:?}")]
    InvalidPath(String),

    /// Failure injected by a test double.
    #[error("Injected failure: {0}")]
    Injected(String),
}

// =============================================================================
// Paths
// =============================================================================

/// A validated location in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The store root.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Build a path from segments.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` if a segment is empty or contains a
    /// character the store does not allow in keys.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(Into::into)
            .map(|segment: String| {
                if is_valid_key(&segment) {
                    Ok(segment)
                } else {
                    Err(StoreError::InvalidPath(segment))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Parse a slash-separated path. Leading, trailing and repeated slashes
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` for segments containing reserved
    /// characters.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        Self::from_segments(path.split('/').filter(|s| !s.is_empty()))
    }

    /// `carts/{userId}`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` if the user ID is not a valid key.
    pub fn cart(user: &UserId) -> Result<Self, StoreError> {
        Self::from_segments([CARTS_ROOT, user.as_str()])
    }

    /// `carts/{userId}/{itemId}`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` if either ID is not a valid key.
    pub fn line_item(user: &UserId, item: &LineItemId) -> Result<Self, StoreError> {
        Self::from_segments([CARTS_ROOT, user.as_str(), item.as_str()])
    }

    /// Extend the path by one key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidPath` if `key` is not a valid key.
    pub fn child(&self, key: &str) -> Result<Self, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidPath(key.to_string()));
        }
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Ok(Self { segments })
    }

    /// Path segments from the root.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `self` equals `other` or lies underneath it.
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Whether a write at one path can change the value observed at the other.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control())
}

// =============================================================================
// Subscriptions
// =============================================================================

/// One delivery on a subscription: the full value at the subscribed path
/// (`None` when nothing is stored there), or the error that ended the feed.
pub type StoreEvent = Result<Option<Value>, StoreError>;

/// A live feed of snapshots for one path.
///
/// Dropping the subscription severs the feed: the producer task (if any) is
/// aborted and the channel is closed, so nothing is delivered afterwards.
#[derive(Debug)]
pub struct StoreSubscription {
    path: StorePath,
    events: mpsc::UnboundedReceiver<StoreEvent>,
    producer: Option<JoinHandle<()>>,
}

impl StoreSubscription {
    /// Wrap a channel fed by the store itself.
    #[must_use]
    pub const fn new(path: StorePath, events: mpsc::UnboundedReceiver<StoreEvent>) -> Self {
        Self {
            path,
            events,
            producer: None,
        }
    }

    /// Wrap a channel fed by a background task owned by this subscription.
    #[must_use]
    pub const fn with_producer(
        path: StorePath,
        events: mpsc::UnboundedReceiver<StoreEvent>,
        producer: JoinHandle<()>,
    ) -> Self {
        Self {
            path,
            events,
            producer: Some(producer),
        }
    }

    /// The subscribed path.
    #[must_use]
    pub const fn path(&self) -> &StorePath {
        &self.path
    }

    /// Wait for the next delivery. Returns `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }

    /// Sever the feed.
    pub fn close(&mut self) {
        self.events.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// RemoteStore
// =============================================================================

/// The four store primitives the cart core is built on.
///
/// Implementations must deliver an initial snapshot on every new subscription
/// and a fresh full snapshot after every change under the subscribed path.
pub trait RemoteStore: Clone + Send + Sync + 'static {
    /// Start observing `path`.
    fn subscribe(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<StoreSubscription, StoreError>> + Send;

    /// Merge `fields` into the object at `path`, leaving other fields intact.
    fn update(
        &self,
        path: &StorePath,
        fields: Map<String, Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Store `value` under a freshly allocated child key of `path` and return
    /// that key.
    fn push(
        &self,
        path: &StorePath,
        value: Value,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Delete everything at `path`. Deleting an absent path succeeds.
    fn remove(&self, path: &StorePath) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_paths() {
        let user = UserId::new("uid-1");
        let item = LineItemId::new("-Nabc");

        let cart = StorePath::cart(&user).unwrap();
        assert_eq!(cart.to_string(), "/carts/uid-1");

        let line = StorePath::line_item(&user, &item).unwrap();
        assert_eq!(line.to_string(), "/carts/uid-1/-Nabc");
        assert!(line.starts_with(&cart));
        assert!(!cart.starts_with(&line));
        assert!(cart.overlaps(&line));
    }

    #[test]
    fn test_invalid_segments_rejected() {
        assert!(matches!(
            StorePath::cart(&UserId::new("a/b")),
            Err(StoreError::InvalidPath(_))
        ));
        assert!(StorePath::cart(&UserId::new("")).is_err());
        assert!(StorePath::cart(&UserId::new("a.b")).is_err());
        assert!(StorePath::root().child("x[0]").is_err());
    }

    #[test]
    fn test_parse_ignores_extra_slashes() {
        let path = StorePath::parse("/carts//u1/").unwrap();
        assert_eq!(path.segments(), ["carts", "u1"]);
        assert!(StorePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_sibling_paths_do_not_overlap() {
        let a = StorePath::parse("carts/u1").unwrap();
        let b = StorePath::parse("carts/u2").unwrap();
        assert!(!a.overlaps(&b));
        assert!(StorePath::root().overlaps(&a));
    }
}
