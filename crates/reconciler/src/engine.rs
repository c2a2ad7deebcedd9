//! Reconciliation, checkout and expiration sweep.

use std::future::Future;
use std::time::{Duration, Instant};

use cart_store::{CartLock, CartStore, CartTransaction};
use chrono::{DateTime, TimeDelta, Utc};
use common::{BookId, UserId};
use domain::{Cart, CartDelta, CartError};
use tracing::Instrument;

use crate::error::{EngineError, Result};

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The cart as now persisted.
    pub cart: Cart,
    /// Books whose stock was taken, ascending.
    pub reserved: Vec<BookId>,
    /// Books whose stock was returned, ascending.
    pub released: Vec<BookId>,
}

impl ReconcileOutcome {
    fn unchanged(cart: Cart) -> Self {
        Self {
            cart,
            reserved: Vec::new(),
            released: Vec::new(),
        }
    }

    /// Returns true if the request matched the stored cart.
    pub fn is_unchanged(&self) -> bool {
        self.reserved.is_empty() && self.released.is_empty()
    }
}

/// Summary of one expiration sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Carts deleted with their stock returned.
    pub carts_released: usize,
    /// Stock units returned across all released carts.
    pub units_released: usize,
    /// Stale carts left alone because another transaction held them.
    pub carts_skipped: usize,
}

/// Reconciles carts against shared book stock.
///
/// Every operation runs as one transaction on its own task. Dropping the
/// returned future does not interrupt the transaction, which still commits
/// or rolls back as a whole.
#[derive(Clone)]
pub struct CartEngine<S: CartStore> {
    store: S,
}

impl<S: CartStore> CartEngine<S> {
    /// Creates an engine over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replaces the user's cart with exactly `book_ids`, reserving and
    /// releasing stock to match.
    ///
    /// Reconciling to the cart already stored is a no-op.
    #[tracing::instrument(skip(self, book_ids), fields(books = book_ids.len()))]
    pub async fn reconcile_cart(
        &self,
        user_id: UserId,
        book_ids: Vec<BookId>,
    ) -> Result<ReconcileOutcome> {
        metrics::counter!("cart_reconciliations_total").increment(1);
        let started = Instant::now();

        let desired = Cart::new(user_id, book_ids)?;
        let result = detached(reconcile(self.store.clone(), desired)).await;

        metrics::histogram!("cart_reconcile_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) if !outcome.is_unchanged() => tracing::info!(
                reserved = outcome.reserved.len(),
                released = outcome.released.len(),
                "cart reconciled"
            ),
            Ok(_) => tracing::debug!("cart unchanged"),
            Err(EngineError::OutOfStock { book_ids }) => {
                metrics::counter!("cart_out_of_stock_total").increment(1);
                tracing::info!(?book_ids, "cart rejected, books out of stock");
            }
            Err(err) => tracing::warn!(error = %err, "cart reconciliation failed"),
        }

        result
    }

    /// Deletes the user's cart, consuming its reservations.
    ///
    /// Stock is not returned. Returns the cart that was checked out.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, user_id: UserId) -> Result<Cart> {
        if !user_id.is_valid() {
            return Err(CartError::InvalidOwner { user_id }.into());
        }

        let cart = detached(checkout(self.store.clone(), user_id)).await?;
        metrics::counter!("cart_checkouts_total").increment(1);
        tracing::info!(books = cart.len(), "cart checked out");
        Ok(cart)
    }

    /// Reads the user's cart without locking.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.store.get_cart(user_id).await?.map(|stored| stored.cart))
    }

    /// Releases every cart untouched for longer than `ttl`.
    pub async fn run_expiration_sweep(&self, ttl: Duration) -> Result<SweepReport> {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.sweep_expired_before(cutoff).await
    }

    /// Releases every cart last written before `cutoff`.
    ///
    /// The whole batch is one transaction: the first failure rolls it back
    /// and the carts are picked up again by the next sweep.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired_before(&self, cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let report = detached(sweep(self.store.clone(), cutoff)).await?;
        metrics::counter!("cart_sweep_released_total").increment(report.carts_released as u64);
        Ok(report)
    }
}

/// Runs `work` on its own task so the caller going away cannot cut a
/// transaction short.
async fn detached<T, F>(work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work.in_current_span())
        .await
        .map_err(|err| EngineError::Interrupted(err.to_string()))?
}

/// Commits on success, rolls back on failure.
async fn finish<T, Tx: CartTransaction>(tx: Tx, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn reconcile<S: CartStore>(store: S, desired: Cart) -> Result<ReconcileOutcome> {
    let mut tx = store.begin().await?;
    let result = reconcile_in(&mut tx, desired).await;
    finish(tx, result).await
}

async fn reconcile_in<Tx: CartTransaction>(tx: &mut Tx, desired: Cart) -> Result<ReconcileOutcome> {
    let previous = tx
        .lock_cart(desired.user_id())
        .await?
        .map(|stored| stored.cart);

    if previous.as_ref() == Some(&desired) {
        return Ok(ReconcileOutcome::unchanged(desired));
    }

    let delta = CartDelta::between(&desired, previous.as_ref());
    let reserve = delta.books_to_reserve();
    let release = delta.books_to_release();

    // Cheap rejection before any stock row is locked. Reads on the
    // transaction's connection so a unit of work never needs a second one.
    if !reserve.is_empty() {
        let unavailable = tx.unavailable_books(&reserve).await?;
        if !unavailable.is_empty() {
            return Err(EngineError::OutOfStock {
                book_ids: unavailable,
            });
        }
    }

    // Lock removals too, so a concurrent reconciliation cannot read stock
    // that is half way through being released.
    let locked = tx.lock_and_read_stock(&delta.affected.to_vec()).await?;

    let sold_out: Vec<BookId> = reserve
        .iter()
        .copied()
        .filter(|id| locked.get(id).is_none_or(|stock| *stock <= 0))
        .collect();
    if !sold_out.is_empty() {
        return Err(EngineError::OutOfStock { book_ids: sold_out });
    }

    if !reserve.is_empty() {
        tx.decrement_stock(&reserve).await?;
    }
    if !release.is_empty() {
        tx.increment_stock(&release).await?;
    }
    tx.upsert_cart(&desired, Utc::now()).await?;

    Ok(ReconcileOutcome {
        cart: desired,
        reserved: reserve,
        released: release,
    })
}

async fn checkout<S: CartStore>(store: S, user_id: UserId) -> Result<Cart> {
    let mut tx = store.begin().await?;
    let result = checkout_in(&mut tx, user_id).await;
    finish(tx, result).await
}

async fn checkout_in<Tx: CartTransaction>(tx: &mut Tx, user_id: UserId) -> Result<Cart> {
    let stored = tx
        .lock_cart(user_id)
        .await?
        .ok_or(EngineError::CartNotFound(user_id))?;
    tx.delete_cart(user_id).await?;
    Ok(stored.cart)
}

async fn sweep<S: CartStore>(store: S, cutoff: DateTime<Utc>) -> Result<SweepReport> {
    let mut tx = store.begin().await?;
    let result = sweep_in(&mut tx, cutoff).await;
    finish(tx, result).await
}

async fn sweep_in<Tx: CartTransaction>(tx: &mut Tx, cutoff: DateTime<Utc>) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    let mut expired = Vec::new();

    for user_id in tx.stale_carts(cutoff).await? {
        match tx.try_lock_cart(user_id).await? {
            CartLock::Busy => report.carts_skipped += 1,
            // Re-checked under lock: the cart may have been rewritten or
            // removed since the scan.
            CartLock::Acquired(Some(stored)) if stored.updated_at < cutoff => {
                expired.push(stored.cart);
            }
            CartLock::Acquired(_) => {}
        }
    }

    if expired.is_empty() {
        return Ok(report);
    }

    // All stock rows up front and ascending, same order as reconciliation.
    let mut books: Vec<BookId> = expired.iter().flat_map(|cart| cart.book_ids()).collect();
    books.sort();
    books.dedup();
    tx.lock_and_read_stock(&books).await?;

    for cart in &expired {
        tx.increment_stock(&cart.to_vec()).await?;
        tx.delete_cart(cart.user_id()).await?;
        report.carts_released += 1;
        report.units_released += cart.len();
        tracing::debug!(user_id = %cart.user_id(), books = cart.len(), "released expired cart");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cart_store::InMemoryCartStore;

    fn ids(raw: &[i64]) -> Vec<BookId> {
        raw.iter().copied().map(BookId::new).collect()
    }

    async fn engine_with_stock(stock: &[(i64, i64)]) -> CartEngine<InMemoryCartStore> {
        let store = InMemoryCartStore::new();
        for &(id, count) in stock {
            store.set_stock(BookId::new(id), count).await;
        }
        CartEngine::new(store)
    }

    #[tokio::test]
    async fn first_reconciliation_reserves_every_book() {
        let engine = engine_with_stock(&[(1, 2), (2, 1)]).await;

        let outcome = engine
            .reconcile_cart(UserId::new(1), ids(&[2, 1, 2]))
            .await
            .unwrap();

        assert_eq!(outcome.reserved, ids(&[1, 2]));
        assert!(outcome.released.is_empty());
        assert_eq!(engine.store().stock(BookId::new(1)).await, Some(1));
        assert_eq!(engine.store().stock(BookId::new(2)).await, Some(0));
    }

    #[tokio::test]
    async fn validation_runs_before_storage() {
        let engine = engine_with_stock(&[]).await;

        let err = engine
            .reconcile_cart(UserId::new(0), ids(&[1]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Cart(CartError::InvalidOwner { .. })
        ));

        let err = engine
            .reconcile_cart(UserId::new(1), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cart(CartError::EmptyCart)));

        let err = engine
            .reconcile_cart(UserId::new(1), ids(&[-2]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Cart(CartError::InvalidItem { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_book_is_out_of_stock() {
        let engine = engine_with_stock(&[(1, 5)]).await;

        let err = engine
            .reconcile_cart(UserId::new(1), ids(&[1, 99]))
            .await
            .unwrap_err();

        match err {
            EngineError::OutOfStock { book_ids } => assert_eq!(book_ids, ids(&[99])),
            other => panic!("expected OutOfStock, got {other:?}"),
        }
        assert_eq!(engine.store().stock(BookId::new(1)).await, Some(5));
        assert_eq!(engine.store().cart_count().await, 0);
    }

    #[tokio::test]
    async fn checkout_requires_valid_owner() {
        let engine = engine_with_stock(&[]).await;
        let err = engine.checkout(UserId::new(-1)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Cart(CartError::InvalidOwner { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_skips_carts_held_by_another_transaction() {
        let engine = engine_with_stock(&[(1, 0)]).await;
        let old = Utc::now() - TimeDelta::hours(1);
        engine
            .store()
            .insert_cart(Cart::from_raw(4, &[1]).unwrap(), old)
            .await;

        let mut holder = engine.store().begin().await.unwrap();
        holder.lock_cart(UserId::new(4)).await.unwrap();

        let report = engine
            .run_expiration_sweep(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(report.carts_skipped, 1);
        assert_eq!(report.carts_released, 0);

        holder.rollback().await.unwrap();
        let report = engine
            .run_expiration_sweep(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(report.carts_released, 1);
        assert_eq!(report.units_released, 1);
        assert_eq!(engine.store().stock(BookId::new(1)).await, Some(1));
    }

    #[tokio::test]
    async fn huge_ttl_sweeps_nothing() {
        let engine = engine_with_stock(&[(1, 0)]).await;
        engine
            .store()
            .insert_cart(
                Cart::from_raw(4, &[1]).unwrap(),
                Utc::now() - TimeDelta::days(365),
            )
            .await;

        let report = engine
            .run_expiration_sweep(Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
