//! Stored shape of a cart line item.
//!
//! Line items live under `carts/{userId}/{itemId}` as camelCase JSON:
//!
//! ```json
//! {
//!   "productId": 1,
//!   "title": "Fjallraven - Foldsack No. 1 Backpack",
//!   "image": "https://fakestoreapi.com/img/81fPKd-2AYL._AC_SL1500_.jpg",
//!   "price": 2034.08,
//!   "quantity": 2,
//!   "addedAt": 1718000000000
//! }
//! ```
//!
//! The key is the line item ID; it is not repeated inside the value.

use chrono::{DateTime, Utc};
use pocketshop_core::{CartLineItem, ConversionRate, LineItemId, ProductId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::catalog::Product;

/// A line item as stored remotely.
///
/// Everything except price and quantity is optional on read, since other
/// clients write to the same collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredLineItem {
    #[serde(default)]
    pub product_id: ProductId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub quantity: i64,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
}

impl StoredLineItem {
    /// Snapshot `product` into a new line, converting its price to the
    /// display currency.
    #[must_use]
    pub fn from_product(
        product: &Product,
        quantity: u32,
        conversion: &ConversionRate,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id: product.id,
            title: product.title.clone(),
            image: product.image.clone(),
            price: conversion.convert(product.price),
            quantity: i64::from(quantity),
            added_at,
        }
    }

    /// Attach the store key, rejecting quantities that cannot exist.
    fn into_line_item(self, id: LineItemId) -> Option<CartLineItem> {
        let quantity = u32::try_from(self.quantity).ok().filter(|q| *q >= 1)?;
        Some(CartLineItem {
            id,
            product_id: self.product_id,
            title: self.title,
            image: self.image,
            price: self.price,
            quantity,
            added_at: self.added_at,
        })
    }
}

/// Fields for a quantity-only write-merge.
#[must_use]
pub fn quantity_fields(quantity: u32) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("quantity".to_string(), Value::from(quantity));
    fields
}

/// Rebuild the line item list from a full cart snapshot.
///
/// An absent or empty snapshot is the empty cart. Entries that cannot be
/// decoded, whose quantity is below 1, or whose line total does not fit in a
/// `Decimal` are skipped with a warning so one bad record from another client
/// cannot hide the rest of the cart.
///
/// Items are ordered by `added_at`, then ID.
#[must_use]
pub fn decode_snapshot(snapshot: Option<&Value>) -> Vec<CartLineItem> {
    let entries = match snapshot {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Object(entries)) => entries,
        Some(other) => {
            warn!(kind = %json_kind(other), "cart snapshot is not an object, treating as empty");
            return Vec::new();
        }
    };

    let mut items: Vec<CartLineItem> = entries
        .iter()
        .filter_map(|(key, value)| {
            let stored = match serde_json::from_value::<StoredLineItem>(value.clone()) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(item_id = %key, error = %e, "skipping malformed cart line item");
                    return None;
                }
            };
            let quantity = stored.quantity;
            let Some(item) = stored.into_line_item(LineItemId::new(key.as_str())) else {
                warn!(item_id = %key, quantity, "skipping cart line item with invalid quantity");
                return None;
            };
            if item.line_total().is_none() {
                warn!(
                    item_id = %key,
                    price = %item.price,
                    quantity,
                    "skipping cart line item whose total overflows"
                );
                return None;
            }
            Some(item)
        })
        .collect();

    items.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));
    items
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
