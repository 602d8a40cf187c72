//! Persistence for the order lifecycle engine.
//!
//! The engine talks to storage only through the traits in [`store`]. Two
//! implementations are provided: [`InMemoryStore`] for tests and local runs,
//! and [`PostgresStore`] for production.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    AddressBook, CartStore, Catalog, CouponClaim, CouponStore, DeliveryFees, OrderCancellation,
    OrderCommit, OrderStore, Store, TrackingChange,
};
