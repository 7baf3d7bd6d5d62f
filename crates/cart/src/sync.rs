//! Live cart synchronization.
//!
//! A [`CartSynchronizer`] subscribes to `carts/{userId}` and republishes
//! every snapshot as a [`CartView`] on a `watch` channel. Each snapshot
//! replaces the previous view outright; nothing is carried over.
//!
//! # Stale deliveries
//!
//! Every activation gets a generation number. The forwarding task only
//! publishes while its generation is still current, and the check happens
//! under the channel's write lock. Deactivation bumps the generation under
//! the same lock, so once `deactivate` returns no snapshot from the old
//! subscription can reach consumers, even one already in flight.
//!
//! A [`ViewReset`] does the same from outside the synchronizer, so an auth
//! change can retire the old user's view before the synchronizer itself gets
//! to re-activate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use pocketshop_core::UserId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::error::{CartError, Result};
use crate::line_item::decode_snapshot;
use crate::store::{RemoteStore, StorePath, StoreSubscription};
use crate::view::{CartView, SyncPhase};

/// Keeps a [`CartView`] in step with the remote cart of one user at a time.
pub struct CartSynchronizer<S: RemoteStore> {
    store: S,
    view: Arc<watch::Sender<CartView>>,
    generation: Arc<AtomicU64>,
    active: Option<ActiveSubscription>,
}

struct ActiveSubscription {
    user: UserId,
    generation: u64,
    task: JoinHandle<()>,
}

impl<S: RemoteStore> CartSynchronizer<S> {
    /// Create an inactive synchronizer.
    #[must_use]
    pub fn new(store: S) -> Self {
        let (view, _) = watch::channel(CartView::uninitialized());
        Self {
            store,
            view: Arc::new(view),
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Observe the published view.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CartView> {
        self.view.subscribe()
    }

    /// The view as of now.
    #[must_use]
    pub fn view(&self) -> CartView {
        self.view.borrow().clone()
    }

    /// User whose cart is being followed.
    #[must_use]
    pub fn active_user(&self) -> Option<&UserId> {
        self.active.as_ref().map(|active| &active.user)
    }

    /// A handle that can reset the view without going through `activate`.
    #[must_use]
    pub fn reset_handle(&self) -> ViewReset {
        ViewReset {
            view: Arc::downgrade(&self.view),
            generation: Arc::downgrade(&self.generation),
        }
    }

    /// Whether the running subscription was retired by a [`ViewReset`] and
    /// can no longer publish.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation != self.generation.load(Ordering::SeqCst))
    }

    /// Start following `user`'s cart, replacing any previous subscription.
    ///
    /// With no user the empty cart is published before this returns and no
    /// subscription is made.
    ///
    /// # Errors
    ///
    /// Returns `CartError::SubscriptionError` if the store refuses the
    /// subscription. A `Failed` view has already been published and the
    /// error reported.
    #[instrument(skip_all, fields(user_id = user.map(tracing::field::display)))]
    pub async fn activate(&mut self, user: Option<&UserId>) -> Result<()> {
        self.stop_task();

        let Some(user) = user else {
            self.restart(CartView::signed_out());
            debug!("no user, cart is empty");
            return Ok(());
        };

        let generation = self.restart(CartView::subscribing(user.clone()));
        let subscription = match self.open(user).await {
            Ok(subscription) => subscription,
            Err(err) => {
                publish_if_current(
                    &self.view,
                    &self.generation,
                    generation,
                    CartView::failed(user.clone(), err.to_string()),
                );
                err.report();
                return Err(err);
            }
        };

        let task = tokio::spawn(forward(
            subscription,
            user.clone(),
            Arc::clone(&self.view),
            Arc::clone(&self.generation),
            generation,
        ));
        self.active = Some(ActiveSubscription {
            user: user.clone(),
            generation,
            task,
        });
        info!("cart subscription active");
        Ok(())
    }

    /// Stop following the cart and publish the torn-down view.
    ///
    /// Safe to call repeatedly; the subscription is released only once.
    pub fn deactivate(&mut self) {
        self.restart(CartView::torn_down());
        if self.stop_task() {
            info!("cart subscription torn down");
        }
    }

    async fn open(&self, user: &UserId) -> Result<StoreSubscription> {
        let path =
            StorePath::cart(user).map_err(|e| CartError::SubscriptionError(e.to_string()))?;
        self.store
            .subscribe(&path)
            .await
            .map_err(|e| CartError::SubscriptionError(e.to_string()))
    }

    /// Invalidate the current generation and publish `next` atomically.
    /// Returns the new generation.
    fn restart(&self, next: CartView) -> u64 {
        let mut generation = 0;
        self.view.send_modify(|view| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *view = next;
        });
        generation
    }

    /// Abort the forwarding task, if any. Returns whether one was running.
    fn stop_task(&mut self) -> bool {
        self.active.take().is_some_and(|active| {
            active.task.abort();
            true
        })
    }
}

impl<S: RemoteStore> Drop for CartSynchronizer<S> {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_task();
    }
}

/// Resets a synchronizer's view from outside, for example from an auth hook.
///
/// Holds weak references only; once the synchronizer is dropped it does
/// nothing.
#[derive(Clone)]
pub struct ViewReset {
    view: Weak<watch::Sender<CartView>>,
    generation: Weak<AtomicU64>,
}

impl ViewReset {
    /// Retire the published view unless it already belongs to `user`.
    ///
    /// With no user the empty cart is published, otherwise the loading view
    /// for `user`. The generation is bumped under the channel lock, so
    /// nothing from the old subscription is published afterwards. A
    /// torn-down view is left alone.
    ///
    /// Returns `false` once the synchronizer is gone.
    pub fn follow(&self, user: Option<&UserId>) -> bool {
        let (Some(view), Some(generation)) = (self.view.upgrade(), self.generation.upgrade())
        else {
            return false;
        };

        view.send_if_modified(|current| {
            let next = match user {
                _ if current.phase() == SyncPhase::TornDown => return false,
                None if current.owner().is_none() && !current.is_loading() => return false,
                None => CartView::signed_out(),
                Some(user) if current.owner() == Some(user) => return false,
                Some(user) => CartView::subscribing(user.clone()),
            };
            generation.fetch_add(1, Ordering::SeqCst);
            *current = next;
            true
        });
        true
    }
}

/// Publish `next` unless the synchronizer has moved on from `expected`.
fn publish_if_current(
    view: &watch::Sender<CartView>,
    generation: &AtomicU64,
    expected: u64,
    next: CartView,
) -> bool {
    view.send_if_modified(|current| {
        if generation.load(Ordering::SeqCst) != expected {
            return false;
        }
        *current = next;
        true
    })
}

/// Apply snapshots from `subscription` until it ends or goes stale.
async fn forward(
    mut subscription: StoreSubscription,
    user: UserId,
    view: Arc<watch::Sender<CartView>>,
    generation: Arc<AtomicU64>,
    expected: u64,
) {
    while let Some(event) = subscription.next().await {
        match event {
            Ok(snapshot) => {
                let next = CartView::synced(user.clone(), decode_snapshot(snapshot.as_ref()));
                if !publish_if_current(&view, &generation, expected, next) {
                    debug!(user_id = %user, "dropping snapshot for stale subscription");
                    return;
                }
            }
            Err(e) => {
                let err = CartError::SubscriptionError(e.to_string());
                if publish_if_current(
                    &view,
                    &generation,
                    expected,
                    CartView::failed(user.clone(), err.to_string()),
                ) {
                    err.report();
                }
                return;
            }
        }
    }

    let err = CartError::SubscriptionError("feed ended".to_string());
    if publish_if_current(
        &view,
        &generation,
        expected,
        CartView::failed(user, err.to_string()),
    ) {
        err.report();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    async fn wait_for(
        rx: &mut watch::Receiver<CartView>,
        f: impl FnMut(&CartView) -> bool,
    ) -> CartView {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(f))
            .await
            .unwrap()
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_no_user_is_empty_without_subscribing() {
        let store = MemoryStore::new();
        let mut sync = CartSynchronizer::new(store.clone());

        sync.activate(None).await.unwrap();

        let view = sync.view();
        assert_eq!(view.phase(), SyncPhase::Synced);
        assert!(!view.is_loading());
        assert_eq!(view.count(), 0);
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_replace_view() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");
        let cart = StorePath::cart(&user).unwrap();
        store.put(
            &cart,
            json!({"a": {"price": 10, "quantity": 2}, "b": {"price": 5, "quantity": 1}}),
        );

        let mut sync = CartSynchronizer::new(store.clone());
        let mut rx = sync.watch();
        sync.activate(Some(&user)).await.unwrap();

        let view = wait_for(&mut rx, |v| v.phase() == SyncPhase::Synced).await;
        assert_eq!(view.count(), 3);
        assert_eq!(view.total(), Decimal::from(25));

        store.put(&cart, json!({"c": {"price": 1, "quantity": 4}}));
        let view = wait_for(&mut rx, |v| v.count() == 4).await;
        assert_eq!(view.items().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_publishes_failed_view() {
        let store = MemoryStore::new();
        store.fail_subscriptions(Some("permission denied"));
        let mut sync = CartSynchronizer::new(store);

        let err = sync.activate(Some(&UserId::new("u1"))).await.unwrap_err();
        assert!(matches!(err, CartError::SubscriptionError(_)));
        assert_eq!(sync.view().phase(), SyncPhase::Failed);
        assert!(!sync.view().is_loading());
    }

    #[tokio::test]
    async fn test_view_reset_retires_subscription() {
        let store = MemoryStore::new();
        let user = UserId::new("u1");
        let cart = StorePath::cart(&user).unwrap();
        store.put(&cart, json!({"a": {"price": 2, "quantity": 2}}));

        let mut sync = CartSynchronizer::new(store.clone());
        let mut rx = sync.watch();
        sync.activate(Some(&user)).await.unwrap();
        wait_for(&mut rx, |v| v.count() == 2).await;

        let reset = sync.reset_handle();
        assert!(reset.follow(Some(&user)));
        assert!(!sync.is_stale());
        assert_eq!(sync.view().count(), 2);

        assert!(reset.follow(None));
        assert!(sync.is_stale());
        let view = sync.view();
        assert_eq!(view.phase(), SyncPhase::Synced);
        assert!(view.owner().is_none());
        assert_eq!(view.count(), 0);

        store.put(&cart, json!({"a": {"price": 2, "quantity": 7}}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.view().count(), 0);

        drop(sync);
        tokio::task::yield_now().await;
        assert!(!reset.follow(None));
    }

    #[tokio::test]
    async fn test_view_reset_leaves_torn_down_view() {
        let mut sync = CartSynchronizer::new(MemoryStore::new());
        sync.deactivate();

        assert!(sync.reset_handle().follow(Some(&UserId::new("u2"))));
        assert_eq!(sync.view().phase(), SyncPhase::TornDown);
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent() {
        let store = MemoryStore::new();
        let mut sync = CartSynchronizer::new(store.clone());
        sync.activate(Some(&UserId::new("u1"))).await.unwrap();
        assert!(sync.active_user().is_some());

        sync.deactivate();
        sync.deactivate();
        assert!(sync.active_user().is_none());
        assert_eq!(sync.view().phase(), SyncPhase::TornDown);
    }

    #[test]
    fn test_stale_generation_cannot_publish() {
        let (view, _) = watch::channel(CartView::uninitialized());
        let generation = AtomicU64::new(2);
        assert!(!publish_if_current(&view, &generation, 1, CartView::signed_out()));
        assert_eq!(view.borrow().phase(), SyncPhase::Uninitialized);
        assert!(publish_if_current(&view, &generation, 2, CartView::signed_out()));
        assert_eq!(view.borrow().phase(), SyncPhase::Synced);
    }
}
