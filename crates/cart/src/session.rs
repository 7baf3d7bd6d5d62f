//! Binds a [`CartSynchronizer`] to the auth state.
//!
//! Sign-in activates the synchronizer for the new user, sign-out resets the
//! view to the empty cart immediately, and a user switch drops the old
//! subscription before the new one is opened.
//!
//! The view reset happens inside the auth state's change hook, so it is
//! visible as soon as `AuthState::apply` returns. Opening the new
//! subscription is left to a background task.

use pocketshop_core::UserId;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::auth::{AuthState, AuthStatus};
use crate::store::RemoteStore;
use crate::sync::CartSynchronizer;
use crate::view::CartView;

/// A running cart synchronizer that follows sign-in and sign-out.
pub struct CartSession {
    view: watch::Receiver<CartView>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CartSession {
    /// Start following `auth` with a synchronizer over `store`.
    #[must_use]
    pub fn start<S: RemoteStore>(store: S, auth: &AuthState) -> Self {
        let synchronizer = CartSynchronizer::new(store);
        let view = synchronizer.watch();
        let reset = synchronizer.reset_handle();
        auth.on_change(move |status| reset.follow(status.user().map(|user| &user.uid)));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(follow_auth(synchronizer, auth.subscribe(), shutdown_rx));
        Self {
            view,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Observe the cart.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CartView> {
        self.view.clone()
    }

    /// The view as of now.
    #[must_use]
    pub fn view(&self) -> CartView {
        self.view.borrow().clone()
    }

    /// Tear the subscription down and wait until it is gone.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for CartSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn follow_auth<S: RemoteStore>(
    mut synchronizer: CartSynchronizer<S>,
    mut status: watch::Receiver<AuthStatus>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut following: Option<Option<UserId>> = None;

    loop {
        let user = status.borrow_and_update().user().map(|u| u.uid.clone());
        if following.as_ref() != Some(&user) || synchronizer.is_stale() {
            debug!(user_id = user.as_ref().map(tracing::field::display), "auth changed");
            // Failures are published on the view and reported by the
            // synchronizer itself.
            let _ = synchronizer.activate(user.as_ref()).await;
            following = Some(user);
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }

    synchronizer.deactivate();
}
