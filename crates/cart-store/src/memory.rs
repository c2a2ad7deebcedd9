use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, UserId};
use domain::Cart;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Result, StoreError,
    store::{CartLock, CartStore, CartTransaction, PersistedCart},
};

#[derive(Debug, Default)]
struct LedgerState {
    stock: HashMap<BookId, i64>,
    carts: HashMap<UserId, PersistedCart>,
}

/// Exclusive per-key locks, created on first use.
///
/// Entries are never removed; the table grows with the number of distinct
/// books and users ever touched.
#[derive(Debug)]
struct RowLocks<K> {
    rows: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for RowLocks<K> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Copy + Eq + Hash> RowLocks<K> {
    async fn row(&self, key: K) -> Arc<Mutex<()>> {
        self.rows.lock().await.entry(key).or_default().clone()
    }

    async fn lock(&self, key: K, timeout: Option<Duration>) -> Result<OwnedMutexGuard<()>> {
        let row = self.row(key).await;
        match timeout {
            Some(limit) => tokio::time::timeout(limit, row.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout),
            None => Ok(row.lock_owned().await),
        }
    }

    async fn try_lock(&self, key: K) -> Option<OwnedMutexGuard<()>> {
        self.row(key).await.try_lock_owned().ok()
    }
}

/// In-memory cart store for tests and database-less runs.
///
/// Provides the same locking behaviour as the PostgreSQL store: cart slots
/// and stock rows are locked individually, changes are buffered per
/// transaction and published atomically on commit.
#[derive(Clone, Default)]
pub struct InMemoryCartStore {
    state: Arc<RwLock<LedgerState>>,
    book_locks: Arc<RowLocks<BookId>>,
    cart_locks: Arc<RowLocks<UserId>>,
    lock_timeout: Option<Duration>,
}

impl InMemoryCartStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails lock acquisition with `LockTimeout` after `timeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Adds a book with the given stock, replacing any previous count.
    pub async fn with_book(self, book_id: BookId, stock: i64) -> Self {
        self.set_stock(book_id, stock).await;
        self
    }

    /// Overwrites a book's stock counter.
    pub async fn set_stock(&self, book_id: BookId, stock: i64) {
        self.state.write().await.stock.insert(book_id, stock.max(0));
    }

    /// Returns a book's committed stock.
    pub async fn stock(&self, book_id: BookId) -> Option<i64> {
        self.state.read().await.stock.get(&book_id).copied()
    }

    /// Stores a cart directly, bypassing reservations.
    pub async fn insert_cart(&self, cart: Cart, updated_at: DateTime<Utc>) {
        let user_id = cart.user_id();
        self.state
            .write()
            .await
            .carts
            .insert(user_id, PersistedCart { cart, updated_at });
    }

    /// Returns the number of persisted carts.
    pub async fn cart_count(&self) -> usize {
        self.state.read().await.carts.len()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            held_books: HashMap::new(),
            held_carts: HashMap::new(),
            stock_changes: HashMap::new(),
            cart_writes: HashMap::new(),
        })
    }

    async fn stock_levels(&self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>> {
        let state = self.state.read().await;
        Ok(book_ids
            .iter()
            .filter_map(|id| state.stock.get(id).map(|stock| (*id, *stock)))
            .collect())
    }

    async fn get_cart(&self, user_id: UserId) -> Result<Option<PersistedCart>> {
        Ok(self.state.read().await.carts.get(&user_id).cloned())
    }
}

/// Transaction over an [`InMemoryCartStore`].
pub struct InMemoryTransaction {
    store: InMemoryCartStore,
    held_books: HashMap<BookId, OwnedMutexGuard<()>>,
    held_carts: HashMap<UserId, OwnedMutexGuard<()>>,
    /// Net stock change per book, applied on commit.
    stock_changes: HashMap<BookId, i64>,
    /// `None` marks a deletion.
    cart_writes: HashMap<UserId, Option<PersistedCart>>,
}

impl InMemoryTransaction {
    /// Acquires every not-yet-held book row, ascending.
    async fn hold_books(&mut self, book_ids: &[BookId]) -> Result<()> {
        let mut missing: Vec<BookId> = book_ids
            .iter()
            .copied()
            .filter(|id| !self.held_books.contains_key(id))
            .collect();
        missing.sort();
        missing.dedup();

        for book_id in missing {
            let guard = self
                .store
                .book_locks
                .lock(book_id, self.store.lock_timeout)
                .await?;
            self.held_books.insert(book_id, guard);
        }
        Ok(())
    }

    async fn current_stock(&self, book_id: BookId) -> Option<i64> {
        let committed = self.store.stock(book_id).await?;
        Some(committed + self.stock_changes.get(&book_id).copied().unwrap_or(0))
    }

    async fn current_cart(&self, user_id: UserId) -> Option<PersistedCart> {
        match self.cart_writes.get(&user_id) {
            Some(written) => written.clone(),
            None => self.store.state.read().await.carts.get(&user_id).cloned(),
        }
    }
}

#[async_trait]
impl CartTransaction for InMemoryTransaction {
    async fn lock_cart(&mut self, user_id: UserId) -> Result<Option<PersistedCart>> {
        if !self.held_carts.contains_key(&user_id) {
            let guard = self
                .store
                .cart_locks
                .lock(user_id, self.store.lock_timeout)
                .await?;
            self.held_carts.insert(user_id, guard);
        }
        Ok(self.current_cart(user_id).await)
    }

    async fn try_lock_cart(&mut self, user_id: UserId) -> Result<CartLock> {
        if !self.held_carts.contains_key(&user_id) {
            match self.store.cart_locks.try_lock(user_id).await {
                Some(guard) => {
                    self.held_carts.insert(user_id, guard);
                }
                None => return Ok(CartLock::Busy),
            }
        }
        Ok(CartLock::Acquired(self.current_cart(user_id).await))
    }

    async fn read_stock(&mut self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>> {
        let mut levels = HashMap::with_capacity(book_ids.len());
        for &book_id in book_ids {
            if let Some(stock) = self.current_stock(book_id).await {
                levels.insert(book_id, stock);
            }
        }
        Ok(levels)
    }

    async fn lock_and_read_stock(&mut self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>> {
        self.hold_books(book_ids).await?;
        self.read_stock(book_ids).await
    }

    async fn decrement_stock(&mut self, book_ids: &[BookId]) -> Result<()> {
        self.hold_books(book_ids).await?;

        for &book_id in book_ids {
            let stock = self.current_stock(book_id).await.ok_or_else(|| {
                StoreError::ConstraintViolation(format!("book {book_id} does not exist"))
            })?;
            if stock < 1 {
                return Err(StoreError::ConstraintViolation(format!(
                    "stock of book {book_id} would become negative"
                )));
            }
        }
        for &book_id in book_ids {
            *self.stock_changes.entry(book_id).or_insert(0) -= 1;
        }
        Ok(())
    }

    async fn increment_stock(&mut self, book_ids: &[BookId]) -> Result<()> {
        self.hold_books(book_ids).await?;

        for &book_id in book_ids {
            if self.store.stock(book_id).await.is_some() {
                *self.stock_changes.entry(book_id).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    async fn upsert_cart(&mut self, cart: &Cart, updated_at: DateTime<Utc>) -> Result<()> {
        self.lock_cart(cart.user_id()).await?;
        self.cart_writes.insert(
            cart.user_id(),
            Some(PersistedCart {
                cart: cart.clone(),
                updated_at,
            }),
        );
        Ok(())
    }

    async fn delete_cart(&mut self, user_id: UserId) -> Result<bool> {
        let existed = self.lock_cart(user_id).await?.is_some();
        self.cart_writes.insert(user_id, None);
        Ok(existed)
    }

    async fn stale_carts(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UserId>> {
        let state = self.store.state.read().await;
        let mut users: Vec<UserId> = state
            .carts
            .values()
            .filter(|stored| stored.updated_at < cutoff)
            .map(|stored| stored.cart.user_id())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.store.state.write().await;

        for (book_id, change) in &self.stock_changes {
            if let Some(stock) = state.stock.get_mut(book_id) {
                *stock += change;
            }
        }
        for (user_id, write) in self.cart_writes {
            match write {
                Some(stored) => {
                    state.carts.insert(user_id, stored);
                }
                None => {
                    state.carts.remove(&user_id);
                }
            }
        }

        // Row locks are released only after the new state is published.
        drop(state);
        drop(self.held_books);
        drop(self.held_carts);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: i64) -> BookId {
        BookId::new(id)
    }

    async fn store_with_stock(stock: &[(i64, i64)]) -> InMemoryCartStore {
        let store = InMemoryCartStore::new();
        for &(id, count) in stock {
            store.set_stock(book(id), count).await;
        }
        store
    }

    #[tokio::test]
    async fn changes_are_invisible_until_commit() {
        let store = store_with_stock(&[(1, 3)]).await;
        let mut tx = store.begin().await.unwrap();

        tx.decrement_stock(&[book(1)]).await.unwrap();
        assert_eq!(store.stock(book(1)).await, Some(3));

        tx.commit().await.unwrap();
        assert_eq!(store.stock(book(1)).await, Some(2));
    }

    #[tokio::test]
    async fn dropped_transaction_discards_changes() {
        let store = store_with_stock(&[(1, 3)]).await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.decrement_stock(&[book(1)]).await.unwrap();
            let cart = Cart::from_raw(9, &[1]).unwrap();
            tx.upsert_cart(&cart, Utc::now()).await.unwrap();
        }

        assert_eq!(store.stock(book(1)).await, Some(3));
        assert_eq!(store.cart_count().await, 0);
    }

    #[tokio::test]
    async fn decrement_below_zero_is_a_constraint_violation() {
        let store = store_with_stock(&[(1, 1), (2, 0)]).await;
        let mut tx = store.begin().await.unwrap();

        let err = tx.decrement_stock(&[book(1), book(2)]).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));

        // Nothing was applied to the book that did have stock.
        let levels = tx.lock_and_read_stock(&[book(1)]).await.unwrap();
        assert_eq!(levels.get(&book(1)), Some(&1));
    }

    #[tokio::test]
    async fn decrement_of_unknown_book_fails() {
        let store = InMemoryCartStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.decrement_stock(&[book(42)]).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn increment_of_unknown_book_is_skipped() {
        let store = store_with_stock(&[(1, 0)]).await;
        let mut tx = store.begin().await.unwrap();
        tx.increment_stock(&[book(1), book(2)]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.stock(book(1)).await, Some(1));
        assert_eq!(store.stock(book(2)).await, None);
    }

    #[tokio::test]
    async fn locked_read_omits_unknown_books() {
        let store = store_with_stock(&[(1, 5)]).await;
        let mut tx = store.begin().await.unwrap();
        let levels = tx.lock_and_read_stock(&[book(1), book(2)]).await.unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[&book(1)], 5);
    }

    #[tokio::test]
    async fn stock_row_lock_times_out_while_held() {
        let store = store_with_stock(&[(1, 5)])
            .await
            .with_lock_timeout(Duration::from_millis(20));

        let mut holder = store.begin().await.unwrap();
        holder.lock_and_read_stock(&[book(1)]).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_and_read_stock(&[book(1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout));

        holder.rollback().await.unwrap();
        waiter.lock_and_read_stock(&[book(1)]).await.unwrap();
    }

    #[tokio::test]
    async fn unlocked_read_ignores_row_locks_and_sees_own_changes() {
        let store = store_with_stock(&[(1, 2), (2, 0)])
            .await
            .with_lock_timeout(Duration::from_millis(20));

        let mut holder = store.begin().await.unwrap();
        holder.decrement_stock(&[book(1)]).await.unwrap();
        assert_eq!(holder.read_stock(&[book(1)]).await.unwrap()[&book(1)], 1);

        // Another transaction reads committed stock without waiting.
        let mut reader = store.begin().await.unwrap();
        assert_eq!(reader.read_stock(&[book(1)]).await.unwrap()[&book(1)], 2);
        assert_eq!(
            reader
                .unavailable_books(&[book(3), book(1), book(2)])
                .await
                .unwrap(),
            vec![book(2), book(3)]
        );

        holder.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn try_lock_reports_busy_cart_slot() {
        let store = InMemoryCartStore::new();
        let user = UserId::new(3);

        let mut holder = store.begin().await.unwrap();
        assert_eq!(holder.lock_cart(user).await.unwrap(), None);

        let mut other = store.begin().await.unwrap();
        assert_eq!(other.try_lock_cart(user).await.unwrap(), CartLock::Busy);

        holder.commit().await.unwrap();
        assert_eq!(
            other.try_lock_cart(user).await.unwrap(),
            CartLock::Acquired(None)
        );
    }

    #[tokio::test]
    async fn upsert_replaces_and_delete_removes() {
        let store = InMemoryCartStore::new();
        let first = Cart::from_raw(4, &[1, 2]).unwrap();
        let second = Cart::from_raw(4, &[3]).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_cart(&first, Utc::now()).await.unwrap();
        tx.upsert_cart(&second, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_cart(UserId::new(4)).await.unwrap().unwrap();
        assert_eq!(stored.cart, second);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.delete_cart(UserId::new(4)).await.unwrap());
        assert!(!tx.delete_cart(UserId::new(4)).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.cart_count().await, 0);
    }

    #[tokio::test]
    async fn stale_carts_are_listed_in_user_order() {
        let store = InMemoryCartStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(45);

        store
            .insert_cart(Cart::from_raw(8, &[1]).unwrap(), old)
            .await;
        store
            .insert_cart(Cart::from_raw(2, &[1]).unwrap(), old)
            .await;
        store
            .insert_cart(Cart::from_raw(5, &[1]).unwrap(), now)
            .await;

        let mut tx = store.begin().await.unwrap();
        let stale = tx
            .stale_carts(now - chrono::Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(stale, vec![UserId::new(2), UserId::new(8)]);
    }
}
