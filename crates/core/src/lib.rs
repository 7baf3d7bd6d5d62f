//! Pocketshop Core - Shared types library.
//!
//! This crate provides common types used across all Pocketshop components:
//! - `cart` - Cart synchronization, mutation, and the store/catalog collaborators
//! - `cli` - Terminal front end over the cart core
//!
//! # Architecture
//!
//! The core crate contains only types and pure computations - no I/O, no
//! network clients, no async runtime. This keeps it lightweight and allows it
//! to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices and currency conversion, cart line items

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
