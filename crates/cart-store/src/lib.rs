//! Stock and cart ledgers for the bookshop cart engine.
//!
//! A [`CartStore`] hands out [`CartTransaction`]s. Everything done through a
//! transaction becomes visible atomically on commit and is discarded on
//! rollback or drop. Locks taken inside a transaction are held until it ends.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryCartStore, InMemoryTransaction};
pub use postgres::{PostgresCartStore, PostgresTransaction};
pub use store::{CartLock, CartStore, CartStoreExt, CartTransaction, PersistedCart};
