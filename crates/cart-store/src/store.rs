use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, UserId};
use domain::Cart;

use crate::Result;

/// A cart as it sits in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCart {
    pub cart: Cart,
    /// Last time the cart was written; the sweep compares this to its cutoff.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a non-blocking attempt to lock a user's cart slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartLock {
    /// The slot is now held by this transaction; carries the cart, if any.
    Acquired(Option<PersistedCart>),
    /// Another transaction holds the slot.
    Busy,
}

/// Entry point to the stock and cart ledgers.
///
/// Reads made directly on the store are unlocked and only see committed data.
/// Anything that must hold a lock or write goes through [`CartStore::begin`].
#[async_trait]
pub trait CartStore: Clone + Send + Sync + 'static {
    /// Transaction type handed out by this store.
    type Tx: CartTransaction;

    /// Starts a new unit of work.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Reads current stock for the given books without locking.
    ///
    /// Unknown books are absent from the result.
    async fn stock_levels(&self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>>;

    /// Reads a user's cart without locking.
    async fn get_cart(&self, user_id: UserId) -> Result<Option<PersistedCart>>;
}

/// A single all-or-nothing unit of work against the ledgers.
///
/// Lock order is cart slots first, then stock rows in ascending book order.
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait CartTransaction: Send + Sized {
    /// Takes the exclusive lock on a user's cart slot and reads the cart.
    ///
    /// The slot can be locked even when the user has no cart yet, which keeps
    /// two first-time reconciliations for the same user from racing.
    async fn lock_cart(&mut self, user_id: UserId) -> Result<Option<PersistedCart>>;

    /// Like [`lock_cart`](Self::lock_cart) but gives up immediately if the
    /// slot is held elsewhere.
    async fn try_lock_cart(&mut self, user_id: UserId) -> Result<CartLock>;

    /// Reads current stock for the given books without locking them.
    ///
    /// Runs on the transaction's own connection and sees its uncommitted
    /// changes. Unknown books are absent from the result.
    async fn read_stock(&mut self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>>;

    /// Returns the books that are missing or have no stock left, ascending,
    /// without locking them.
    ///
    /// Advisory only; the answer must be confirmed under lock.
    async fn unavailable_books(&mut self, book_ids: &[BookId]) -> Result<Vec<BookId>> {
        let levels = self.read_stock(book_ids).await?;
        Ok(unavailable(book_ids, &levels))
    }

    /// Locks the stock rows of exactly the given books and reads them.
    ///
    /// Blocks while another transaction holds any of the rows. Unknown books
    /// are absent from the result.
    async fn lock_and_read_stock(&mut self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>>;

    /// Takes one unit of stock from each book.
    ///
    /// Fails with `ConstraintViolation` if any counter would go negative or
    /// any book does not exist.
    async fn decrement_stock(&mut self, book_ids: &[BookId]) -> Result<()>;

    /// Returns one unit of stock to each book. Unknown books are skipped.
    async fn increment_stock(&mut self, book_ids: &[BookId]) -> Result<()>;

    /// Writes the cart as the user's only cart, replacing any previous one.
    async fn upsert_cart(&mut self, cart: &Cart, updated_at: DateTime<Utc>) -> Result<()>;

    /// Deletes the user's cart. Returns false if there was none.
    async fn delete_cart(&mut self, user_id: UserId) -> Result<bool>;

    /// Lists owners of carts last written before `cutoff`, ascending.
    ///
    /// This is a plain read; callers lock each slot before acting on it.
    async fn stale_carts(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UserId>>;

    /// Makes every change visible and releases all locks.
    async fn commit(self) -> Result<()>;

    /// Discards every change and releases all locks.
    async fn rollback(self) -> Result<()>;
}

/// Convenience methods available on every store.
#[async_trait]
pub trait CartStoreExt: CartStore {
    /// Returns the books that are missing or have no stock left, ascending.
    async fn unavailable_books(&self, book_ids: &[BookId]) -> Result<Vec<BookId>> {
        let levels = self.stock_levels(book_ids).await?;
        Ok(unavailable(book_ids, &levels))
    }

    /// Advisory pre-check: true if every book currently has stock.
    ///
    /// Not a guarantee; the answer must be confirmed under lock.
    async fn has_sufficient_stock(&self, book_ids: &[BookId]) -> Result<bool> {
        Ok(self.unavailable_books(book_ids).await?.is_empty())
    }
}

impl<T: CartStore> CartStoreExt for T {}

fn unavailable(book_ids: &[BookId], levels: &HashMap<BookId, i64>) -> Vec<BookId> {
    let mut unavailable: Vec<BookId> = book_ids
        .iter()
        .copied()
        .filter(|id| levels.get(id).is_none_or(|stock| *stock <= 0))
        .collect();
    unavailable.sort();
    unavailable.dedup();
    unavailable
}
