//! Cart line items and the aggregates derived from them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{LineItemId, ProductId};

/// A single line in a user's cart.
///
/// Title, image and price are copies taken when the product was added; they
/// are not refreshed if the catalog changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    /// Store-allocated key, stable for the lifetime of the line.
    pub id: LineItemId,
    /// Catalog product this line was created from.
    pub product_id: ProductId,
    /// Product title at add-time.
    pub title: String,
    /// Product image URL at add-time.
    pub image: String,
    /// Unit price in the display currency at add-time.
    pub price: Decimal,
    /// Number of units. Always at least 1 while the line exists.
    pub quantity: u32,
    /// When the line was created. Informative only.
    pub added_at: DateTime<Utc>,
}

impl CartLineItem {
    /// Unit price multiplied by quantity, or `None` if that overflows.
    #[must_use]
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Item count and monetary total for a set of line items.
///
/// Only obtainable through [`CartTotals::from_items`], so the numbers always
/// describe exactly the items they were computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CartTotals {
    count: u64,
    total: Decimal,
}

impl CartTotals {
    /// Sum quantities and line totals over `items`.
    ///
    /// Returns `None` if any line total or the running total overflows.
    #[must_use]
    pub fn from_items(items: &[CartLineItem]) -> Option<Self> {
        items.iter().try_fold(Self::default(), |acc, item| {
            Some(Self {
                count: acc.count.checked_add(u64::from(item.quantity))?,
                total: acc.total.checked_add(item.line_total()?)?,
            })
        })
    }

    /// Sum of quantities over all line items.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Sum of `price * quantity` over all line items.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.total
    }
}
