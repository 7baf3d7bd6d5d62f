//! Cart commands.
//!
//! Each invocation restores the session, starts a cart session against the
//! realtime store, waits for the first snapshot where the command needs to
//! know the cart, and tears everything down again before exiting.

use std::time::Duration;

use pocketshop_cart::store::RealtimeStore;
use pocketshop_cart::{
    AuthState, CartConfig, CartError, CartMutator, CartSession, CartView, CatalogClient,
    SessionCache, SyncPhase,
};
use pocketshop_core::{ConversionRate, LineItemId, Price, ProductId};
use tracing::info;

/// How long to wait for the first snapshot.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything a cart command needs, wired for the signed-in user.
pub struct CartContext {
    auth: AuthState,
    session: CartSession,
    mutator: CartMutator<RealtimeStore>,
    catalog: CatalogClient,
    conversion: ConversionRate,
}

impl CartContext {
    /// Restore the session and start following the cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not configured or the session cache
    /// cannot be updated.
    pub async fn open(config: &CartConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = RealtimeStore::new(config.store()?);
        let cache = SessionCache::new(&config.session_cache_path);
        let auth = AuthState::restore(cache.clone()).await;
        let session = CartSession::start(store.clone(), &auth);

        // The session cache stands in for the auth provider's first report.
        auth.apply(cache.load().await).await?;

        let mutator = CartMutator::new(store, auth.clone(), session.watch(), config.conversion);
        Ok(Self {
            auth,
            session,
            mutator,
            catalog: CatalogClient::new(&config.catalog),
            conversion: config.conversion,
        })
    }

    /// Tear the cart session down.
    pub async fn close(self) {
        self.session.stop().await;
    }

    /// Print the cart once it has loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart did not load.
    pub async fn show(&self) -> Result<(), Box<dyn std::error::Error>> {
        let view = self.settled().await?;
        self.print_view(&view);
        Ok(())
    }

    /// Print the cart on every change until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if the Ctrl+C handler cannot be installed.
    pub async fn watch(&self) -> Result<(), Box<dyn std::error::Error>> {
        let mut rx = self.session.watch();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            let view = rx.borrow_and_update().clone();
            if !view.is_loading() {
                self.print_view(&view);
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                signal = &mut ctrl_c => {
                    signal?;
                    info!("Stopped watching cart");
                    return Ok(());
                }
            }
        }
    }

    /// Add `quantity` units of a catalog product.
    ///
    /// # Errors
    ///
    /// Returns an error if the product cannot be fetched or the write fails.
    #[allow(clippy::print_stdout)]
    pub async fn add(
        &self,
        product: ProductId,
        quantity: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if self.auth.current_user().is_none() {
            return Err(notify(CartError::NotAuthenticated));
        }
        let product = self.catalog.product(product).await?;
        let id = self.mutator.add(&product, quantity).await.map_err(notify)?;

        println!("Added {} x {} ({id})", quantity, product.title);
        Ok(())
    }

    /// Set a line's quantity.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart did not load or the write fails.
    pub async fn set(
        &self,
        item: &LineItemId,
        quantity: i64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.settled().await?;
        self.mutator
            .update_quantity(item, quantity)
            .await
            .map_err(notify)?;
        Ok(())
    }

    /// Add one unit to a line.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart did not load or the write fails.
    pub async fn increment(&self, item: &LineItemId) -> Result<(), Box<dyn std::error::Error>> {
        self.settled().await?;
        self.mutator.increment(item).await.map_err(notify)?;
        Ok(())
    }

    /// Remove one unit from a line.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart did not load or the write fails.
    pub async fn decrement(&self, item: &LineItemId) -> Result<(), Box<dyn std::error::Error>> {
        self.settled().await?;
        self.mutator.decrement(item).await.map_err(notify)?;
        Ok(())
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn remove(&self, item: &LineItemId) -> Result<(), Box<dyn std::error::Error>> {
        self.mutator.remove(item).await.map_err(notify)?;
        Ok(())
    }

    /// Remove every line.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart did not load or the write fails.
    pub async fn clear(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.settled().await?;
        self.mutator.clear().await.map_err(notify)?;
        Ok(())
    }

    /// Wait until the view reflects the current user and is no longer
    /// loading.
    async fn settled(&self) -> Result<CartView, Box<dyn std::error::Error>> {
        let user = self.auth.current_user().map(|user| user.uid);
        let mut rx = self.session.watch();

        let view = tokio::time::timeout(
            SETTLE_TIMEOUT,
            rx.wait_for(|view| !view.is_loading() && view.owner() == user.as_ref()),
        )
        .await
        .map_err(|_| "Timed out waiting for the cart to load")??
        .clone();

        if view.phase() == SyncPhase::Failed {
            let err = CartError::SubscriptionError(view.error().unwrap_or_default().to_string());
            return Err(notify(err));
        }
        Ok(view)
    }

    #[allow(clippy::print_stdout)]
    fn print_view(&self, view: &CartView) {
        if view.owner().is_none() {
            println!("Not signed in. Your cart is empty.");
            return;
        }
        if view.is_empty() {
            println!("Your cart is empty.");
            return;
        }

        let currency = self.conversion.to_currency();
        for item in view.items() {
            let line_total = item
                .line_total()
                .map_or_else(|| "-".to_string(), |total| Price::new(total, currency).to_string());
            println!(
                "{:<22} {:>3} x {:<40} {:>12}",
                item.id.as_str(),
                item.quantity,
                item.title,
                line_total,
            );
        }
        println!(
            "Items: {}  Total: {}",
            view.count(),
            Price::new(view.total(), currency)
        );
    }
}

/// Show the user-facing notice for `err`, then hand the error on for the
/// exit status.
#[allow(clippy::print_stderr)]
fn notify(err: CartError) -> Box<dyn std::error::Error> {
    eprintln!("{}", err.notice());
    Box::new(err)
}
