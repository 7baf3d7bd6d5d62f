//! Integration tests for Pocketshop.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pocketshop-integration-tests
//! ```
//!
//! Everything runs against in-process stores; no network access is needed.
//!
//! # Test Categories
//!
//! - `cart_sync` - Synchronizer and session behavior
//! - `cart_mutations` - Mutator rules and their effect on the next snapshot
//!
//! This crate holds the shared fixtures.

#![allow(clippy::missing_panics_doc)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pocketshop_cart::catalog::Rating;
use pocketshop_cart::store::{
    MemoryStore, RemoteStore, StoreError, StoreEvent, StorePath, StoreSubscription,
};
use pocketshop_cart::{AuthState, AuthUser, CartMutator, CartSession, CartView, Product};
use pocketshop_core::{ConversionRate, CurrencyCode, ProductId, UserId};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

/// How long a test waits for a view before failing.
pub const VIEW_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Fixtures
// =============================================================================

/// A catalog product with a USD price.
#[must_use]
pub fn product(id: u64, price: &str) -> Product {
    Product {
        id: ProductId::new(id),
        title: format!("Product {id}"),
        price: price.parse().expect("valid price literal"),
        description: String::new(),
        category: "electronics".to_string(),
        image: format!("https://fakestoreapi.com/img/{id}.jpg"),
        rating: Rating::default(),
    }
}

/// One-to-one conversion, so stored prices equal catalog prices.
#[must_use]
pub const fn identity_rate() -> ConversionRate {
    ConversionRate::identity(CurrencyCode::USD)
}

/// Auth state already signed in as `uid`.
pub async fn signed_in(uid: &str) -> AuthState {
    let auth = AuthState::new();
    auth.apply(Some(AuthUser::new(uid, None)))
        .await
        .expect("no session cache to write");
    auth
}

/// `carts/{uid}`.
#[must_use]
pub fn cart_path(uid: &str) -> StorePath {
    StorePath::cart(&UserId::new(uid)).expect("valid user id")
}

/// Wait until the view satisfies `predicate`.
pub async fn wait_for_view(
    rx: &mut watch::Receiver<CartView>,
    predicate: impl FnMut(&CartView) -> bool,
) -> CartView {
    tokio::time::timeout(VIEW_TIMEOUT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for cart view")
        .expect("cart view channel closed")
        .clone()
}

/// Expected count and total for a raw cart snapshot.
#[must_use]
pub fn expected_totals(snapshot: &Value) -> (u64, Decimal) {
    snapshot
        .as_object()
        .into_iter()
        .flat_map(|items| items.values())
        .fold((0, Decimal::ZERO), |(count, total), item| {
            let quantity = item["quantity"].as_u64().expect("quantity");
            let price: Decimal = item["price"].to_string().parse().expect("decimal price");
            (count + quantity, total + price * Decimal::from(quantity))
        })
}

// =============================================================================
// Harness
// =============================================================================

/// A signed-in user with a running cart session over a [`MemoryStore`].
pub struct Harness {
    pub store: MemoryStore,
    pub auth: AuthState,
    pub session: CartSession,
    pub mutator: CartMutator<MemoryStore>,
    pub view: watch::Receiver<CartView>,
}

impl Harness {
    /// Seed `carts/{uid}` with `cart`, sign in and wait for the first
    /// snapshot.
    pub async fn signed_in(uid: &str, cart: Value) -> Self {
        let store = MemoryStore::new();
        store.put(&cart_path(uid), cart);
        let auth = signed_in(uid).await;
        let session = CartSession::start(store.clone(), &auth);
        let mut view = session.watch();
        let owner = UserId::new(uid);
        wait_for_view(&mut view, |v| !v.is_loading() && v.owner() == Some(&owner)).await;

        let mutator = CartMutator::new(store.clone(), auth.clone(), session.watch(), identity_rate());
        store.clear_journal();
        Self {
            store,
            auth,
            session,
            mutator,
            view,
        }
    }

    /// The view as of now.
    #[must_use]
    pub fn current(&self) -> CartView {
        self.view.borrow().clone()
    }
}

// =============================================================================
// Scripted store
// =============================================================================

/// A store whose snapshots are delivered by the test, one call at a time.
///
/// Writes succeed and do nothing.
#[derive(Clone, Default)]
pub struct ScriptedStore {
    feeds: Arc<Mutex<Vec<mpsc::UnboundedSender<StoreEvent>>>>,
}

impl ScriptedStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `snapshot` on every subscription ever opened.
    pub fn deliver(&self, snapshot: Option<Value>) {
        for feed in self.feeds.lock().expect("feeds lock").iter() {
            let _ = feed.send(Ok(snapshot.clone()));
        }
    }

    /// Number of subscribe calls so far.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.feeds.lock().expect("feeds lock").len()
    }
}

impl RemoteStore for ScriptedStore {
    async fn subscribe(&self, path: &StorePath) -> Result<StoreSubscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().expect("feeds lock").push(tx);
        Ok(StoreSubscription::new(path.clone(), rx))
    }

    async fn update(&self, _path: &StorePath, _fields: Map<String, Value>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn push(&self, _path: &StorePath, _value: Value) -> Result<String, StoreError> {
        Ok("-scripted".to_string())
    }

    async fn remove(&self, _path: &StorePath) -> Result<(), StoreError> {
        Ok(())
    }
}
