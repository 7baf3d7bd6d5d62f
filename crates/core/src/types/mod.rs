//! Core types for Pocketshop.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod id;
pub mod price;

pub use cart::{CartLineItem, CartTotals};
pub use id::*;
pub use price::{ConversionRate, CurrencyCode, Price, PriceError};
