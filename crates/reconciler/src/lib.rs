//! Cart-to-stock reconciliation for the bookshop.
//!
//! [`CartEngine`] moves a user's cart to a new desired state in one atomic
//! unit of work:
//! 1. Lock the user's cart slot and load the previous cart
//! 2. Compute books to reserve and release
//! 3. Pre-check availability, then lock and re-check the affected stock rows
//! 4. Adjust stock counters and write the new cart
//!
//! [`ExpirationSweeper`] periodically returns the stock held by carts nobody
//! has touched for longer than a TTL.

pub mod engine;
pub mod error;
pub mod sweeper;

pub use engine::{CartEngine, ReconcileOutcome, SweepReport};
pub use error::{EngineError, Result};
pub use sweeper::{ExpirationSweeper, SweeperConfig, SweeperHandle};
