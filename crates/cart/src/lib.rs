//! Pocketshop cart library.
//!
//! A per-user shopping cart kept in a hosted realtime database, plus the
//! read-only product catalog it is filled from.
//!
//! # Architecture
//!
//! - [`sync::CartSynchronizer`] subscribes to `carts/{userId}` and publishes a
//!   [`view::CartView`] (items, count, total, loading flag) on every snapshot
//! - [`mutator::CartMutator`] issues add, update, remove and clear writes
//! - [`session::CartSession`] re-activates the synchronizer whenever
//!   [`auth::AuthState`] changes
//! - [`store::RemoteStore`] is the four-primitive store seam, implemented by
//!   [`store::RealtimeStore`] (REST + SSE) and [`store::MemoryStore`]
//! - [`catalog::CatalogClient`] reads products and categories
//!
//! Every failure surfaces as a [`error::CartError`] that can be shown to the
//! user as an [`error::Notice`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod line_item;
pub mod mutator;
pub mod session;
pub mod store;
pub mod sync;
pub mod view;

pub use auth::{AuthState, AuthStatus, AuthUser, SessionCache};
pub use catalog::{CatalogClient, CategoryFilter, Product};
pub use config::CartConfig;
pub use error::{CartError, Notice};
pub use mutator::CartMutator;
pub use session::CartSession;
pub use sync::CartSynchronizer;
pub use view::{CartView, SyncPhase};
