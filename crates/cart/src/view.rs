//! The read-only cart view published to consumers.

use pocketshop_core::{CartLineItem, CartTotals, LineItemId, UserId};
use rust_decimal::Decimal;
use tracing::warn;

const TOTAL_OVERFLOW: &str = "cart total is out of range";

/// Lifecycle of a synchronizer's subscription.
///
/// `Uninitialized -> Subscribing -> Synced (-> Synced ...) -> TornDown`, with
/// `Failed` reachable from `Subscribing` and `Synced` when the feed breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// Never activated.
    #[default]
    Uninitialized,
    /// Waiting for the first snapshot.
    Subscribing,
    /// Showing the latest snapshot, or the empty cart when signed out.
    Synced,
    /// The feed could not be established or was dropped.
    Failed,
    /// Deactivated. Nothing more will be delivered for this activation.
    TornDown,
}

/// A consistent picture of the cart at one point in time.
///
/// Items and totals are always computed together from the same snapshot;
/// there is no way to change one without the other.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CartView {
    phase: SyncPhase,
    owner: Option<UserId>,
    items: Vec<CartLineItem>,
    totals: CartTotals,
    error: Option<String>,
}

impl CartView {
    /// Before the first activation.
    #[must_use]
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Nobody is signed in: the empty cart, immediately.
    #[must_use]
    pub fn signed_out() -> Self {
        Self {
            phase: SyncPhase::Synced,
            ..Self::default()
        }
    }

    /// Activated for `owner`, first snapshot pending.
    #[must_use]
    pub fn subscribing(owner: UserId) -> Self {
        Self {
            phase: SyncPhase::Subscribing,
            owner: Some(owner),
            ..Self::default()
        }
    }

    /// Built from a decoded snapshot.
    ///
    /// A cart whose total does not fit in a `Decimal` becomes a `Failed`
    /// view.
    #[must_use]
    pub fn synced(owner: UserId, items: Vec<CartLineItem>) -> Self {
        let Some(totals) = CartTotals::from_items(&items) else {
            warn!(user_id = %owner, lines = items.len(), "cart total overflows");
            return Self::failed(owner, TOTAL_OVERFLOW);
        };
        Self {
            phase: SyncPhase::Synced,
            owner: Some(owner),
            items,
            totals,
            error: None,
        }
    }

    /// The feed failed. Shows the empty cart rather than a stale one.
    #[must_use]
    pub fn failed(owner: UserId, error: impl Into<String>) -> Self {
        Self {
            phase: SyncPhase::Failed,
            owner: Some(owner),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// After deactivation.
    #[must_use]
    pub fn torn_down() -> Self {
        Self {
            phase: SyncPhase::TornDown,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// User whose cart this is, if any.
    #[must_use]
    pub const fn owner(&self) -> Option<&UserId> {
        self.owner.as_ref()
    }

    #[must_use]
    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    /// Look up a line by ID.
    #[must_use]
    pub fn item(&self, id: &LineItemId) -> Option<&CartLineItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    #[must_use]
    pub const fn totals(&self) -> CartTotals {
        self.totals
    }

    /// Sum of quantities.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.totals.count()
    }

    /// Sum of price times quantity, in the display currency.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.totals.total()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True from activation until the first snapshot has been applied.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.phase, SyncPhase::Uninitialized | SyncPhase::Subscribing)
    }

    /// Why the feed failed, when `phase` is `Failed`.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use pocketshop_core::ProductId;

    use super::*;

    fn line(id: &str, price: i64, quantity: u32) -> CartLineItem {
        CartLineItem {
            id: LineItemId::new(id),
            product_id: ProductId::new(1),
            title: id.to_string(),
            image: String::new(),
            price: Decimal::from(price),
            quantity,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn test_synced_view_derives_totals() {
        let view = CartView::synced(UserId::new("u1"), vec![line("a", 10, 2), line("b", 5, 1)]);
        assert_eq!(view.phase(), SyncPhase::Synced);
        assert_eq!(view.count(), 3);
        assert_eq!(view.total(), Decimal::from(25));
        assert!(!view.is_loading());
        assert_eq!(view.item(&LineItemId::new("b")).unwrap().quantity, 1);
        assert!(view.item(&LineItemId::new("c")).is_none());
    }

    #[test]
    fn test_overflowing_total_is_failed_view() {
        let big = Decimal::from_i128_with_scale(40_000_000_000_000_000_000_000_000_000, 0);
        let mut a = line("a", 0, 1);
        a.price = big;
        let mut b = line("b", 0, 1);
        b.price = big;

        let view = CartView::synced(UserId::new("u1"), vec![a, b]);
        assert_eq!(view.phase(), SyncPhase::Failed);
        assert!(view.is_empty());
        assert!(!view.is_loading());
        assert_eq!(view.error(), Some(TOTAL_OVERFLOW));
    }

    #[test]
    fn test_loading_flag() {
        assert!(CartView::uninitialized().is_loading());
        assert!(CartView::subscribing(UserId::new("u1")).is_loading());
        assert!(!CartView::signed_out().is_loading());
        assert!(!CartView::torn_down().is_loading());
        assert!(!CartView::failed(UserId::new("u1"), "boom").is_loading());
    }

    #[test]
    fn test_failed_view_is_empty() {
        let view = CartView::failed(UserId::new("u1"), "permission denied");
        assert!(view.is_empty());
        assert_eq!(view.count(), 0);
        assert_eq!(view.error(), Some("permission denied"));
    }
}
