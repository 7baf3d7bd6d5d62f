//! Cart commands.
//!
//! [`CartMutator`] turns user intents into store writes. It never touches the
//! published view: the result of a write shows up with the next snapshot.
//!
//! Rules enforced here rather than by the store:
//!
//! - every command needs a signed-in user, checked before any store call
//! - a quantity of zero or less is a delete, never a write
//! - clearing a cart the synced view shows empty makes no store call

use chrono::Utc;
use pocketshop_core::{ConversionRate, LineItemId, UserId};
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::auth::AuthState;
use crate::catalog::Product;
use crate::error::{CartError, CartOperation, Result, add_breadcrumb};
use crate::line_item::{StoredLineItem, quantity_fields};
use crate::store::{RemoteStore, StoreError, StorePath};
use crate::view::{CartView, SyncPhase};

/// Issues cart writes for the signed-in user.
#[derive(Clone)]
pub struct CartMutator<S: RemoteStore> {
    store: S,
    auth: AuthState,
    cart: watch::Receiver<CartView>,
    conversion: ConversionRate,
}

impl<S: RemoteStore> CartMutator<S> {
    /// `cart` is the view published by the synchronizer for the same auth
    /// state; it is consulted for existence checks only.
    #[must_use]
    pub const fn new(
        store: S,
        auth: AuthState,
        cart: watch::Receiver<CartView>,
        conversion: ConversionRate,
    ) -> Self {
        Self {
            store,
            auth,
            cart,
            conversion,
        }
    }

    /// Add `quantity` units of `product` as a new line.
    ///
    /// Repeated adds of the same product create separate lines.
    ///
    /// # Errors
    ///
    /// - `CartError::NotAuthenticated` if nobody is signed in
    /// - `CartError::InvalidQuantity` if `quantity` is zero
    /// - `CartError::WriteFailed` if the store rejects the write
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add(&self, product: &Product, quantity: u32) -> Result<LineItemId> {
        let user = self.require_user()?;
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(0));
        }

        let line = StoredLineItem::from_product(product, quantity, &self.conversion, Utc::now());
        let op = CartOperation::Add;
        let value = serde_json::to_value(&line).map_err(|e| self.failed(op, e.into()))?;
        let path = StorePath::cart(&user).map_err(|e| self.failed(op, e))?;
        let key = self
            .store
            .push(&path, value)
            .await
            .map_err(|e| self.failed(op, e))?;

        let id = LineItemId::new(key);
        let product_id = product.id.to_string();
        add_breadcrumb(
            "Added item to cart",
            &[("product_id", product_id.as_str()), ("item_id", id.as_str())],
        );
        info!(item_id = %id, quantity, "added cart line");
        Ok(id)
    }

    /// Set the quantity of an existing line. Zero or less removes it.
    ///
    /// # Errors
    ///
    /// - `CartError::NotAuthenticated` if nobody is signed in
    /// - `CartError::NotFound` if the line is not in the current cart view
    /// - `CartError::InvalidQuantity` if `quantity` does not fit a stored
    ///   quantity
    /// - `CartError::WriteFailed` if the store rejects the write
    #[instrument(skip(self), fields(item_id = %item))]
    pub async fn update_quantity(&self, item: &LineItemId, quantity: i64) -> Result<()> {
        let user = self.require_user()?;
        if quantity <= 0 {
            return self.remove_line(&user, item).await;
        }
        let quantity = u32::try_from(quantity).map_err(|_| CartError::InvalidQuantity(quantity))?;

        // A merge at a missing path would create a partial line.
        if self.current_quantity(&user, item).is_none() {
            return Err(CartError::NotFound(item.clone()));
        }

        let op = CartOperation::UpdateQuantity;
        let path = StorePath::line_item(&user, item).map_err(|e| self.failed(op, e))?;
        self.store
            .update(&path, quantity_fields(quantity))
            .await
            .map_err(|e| self.failed(op, e))?;

        let quantity = quantity.to_string();
        add_breadcrumb(
            "Updated cart quantity",
            &[("item_id", item.as_str()), ("quantity", quantity.as_str())],
        );
        Ok(())
    }

    /// One more unit of a line.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_quantity`].
    pub async fn increment(&self, item: &LineItemId) -> Result<()> {
        let user = self.require_user()?;
        let current = self
            .current_quantity(&user, item)
            .ok_or_else(|| CartError::NotFound(item.clone()))?;
        self.update_quantity(item, i64::from(current) + 1).await
    }

    /// One unit fewer. The line is removed when it reaches zero.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update_quantity`].
    pub async fn decrement(&self, item: &LineItemId) -> Result<()> {
        let user = self.require_user()?;
        let current = self
            .current_quantity(&user, item)
            .ok_or_else(|| CartError::NotFound(item.clone()))?;
        self.update_quantity(item, i64::from(current) - 1).await
    }

    /// Delete a line. Removing a line that is already gone succeeds.
    ///
    /// # Errors
    ///
    /// - `CartError::NotAuthenticated` if nobody is signed in
    /// - `CartError::WriteFailed` if the store rejects the delete
    #[instrument(skip(self), fields(item_id = %item))]
    pub async fn remove(&self, item: &LineItemId) -> Result<()> {
        let user = self.require_user()?;
        self.remove_line(&user, item).await
    }

    /// Delete the whole cart in one store call.
    ///
    /// The call is skipped only when a synced view of the user's cart shows
    /// it empty. While loading, after a feed failure or for another user's
    /// view, the delete is issued.
    ///
    /// # Errors
    ///
    /// - `CartError::NotAuthenticated` if nobody is signed in
    /// - `CartError::WriteFailed` if the store rejects the delete
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let user = self.require_user()?;
        if self.confirmed_empty(&user) {
            info!("cart already empty");
            return Ok(());
        }

        let op = CartOperation::Clear;
        let path = StorePath::cart(&user).map_err(|e| self.failed(op, e))?;
        self.store
            .remove(&path)
            .await
            .map_err(|e| self.failed(op, e))?;

        add_breadcrumb("Cleared cart", &[]);
        info!("cleared cart");
        Ok(())
    }

    async fn remove_line(&self, user: &UserId, item: &LineItemId) -> Result<()> {
        let op = CartOperation::Remove;
        let path = StorePath::line_item(user, item).map_err(|e| self.failed(op, e))?;
        self.store
            .remove(&path)
            .await
            .map_err(|e| self.failed(op, e))?;

        add_breadcrumb("Removed item from cart", &[("item_id", item.as_str())]);
        Ok(())
    }

    fn require_user(&self) -> Result<UserId> {
        self.auth
            .current_user()
            .map(|user| user.uid)
            .ok_or(CartError::NotAuthenticated)
    }

    /// Quantity of `item` in the view, if the view belongs to `user`.
    fn current_quantity(&self, user: &UserId, item: &LineItemId) -> Option<u32> {
        let view = self.cart.borrow();
        if view.owner() != Some(user) {
            return None;
        }
        view.item(item).map(|line| line.quantity)
    }

    fn confirmed_empty(&self, user: &UserId) -> bool {
        let view = self.cart.borrow();
        view.phase() == SyncPhase::Synced && view.owner() == Some(user) && view.is_empty()
    }

    /// Wrap and report a store failure.
    fn failed(&self, operation: CartOperation, source: StoreError) -> CartError {
        let err = CartError::write_failed(operation, source);
        err.report();
        err
    }
}
