use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BookId, UserId};
use domain::Cart;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    Result, StoreError,
    store::{CartLock, CartStore, CartTransaction, PersistedCart},
};

/// PostgreSQL-backed cart store.
///
/// Stock rows are locked with `SELECT ... FOR UPDATE`. Cart slots are locked
/// with transaction-scoped advisory locks keyed by user ID, so a slot can be
/// held before the user's cart row exists. The advisory key space is reserved
/// for cart slots.
#[derive(Clone)]
pub struct PostgresCartStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PostgresCartStore {
    /// Creates a new PostgreSQL cart store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Makes every transaction give up on a row lock after `timeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_cart(row: PgRow) -> Result<PersistedCart> {
        let user_id = UserId::new(row.try_get("user_id")?);
        let book_ids: Vec<i64> = row.try_get("book_ids")?;
        let cart = Cart::new(user_id, book_ids.into_iter().map(BookId::new))
            .map_err(|source| StoreError::CorruptCart { user_id, source })?;

        Ok(PersistedCart {
            cart,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn stock_row(row: PgRow) -> Result<(BookId, i64)> {
    Ok((BookId::new(row.try_get("id")?), row.try_get("stock")?))
}

fn raw_ids(book_ids: &[BookId]) -> Vec<i64> {
    book_ids.iter().map(BookId::get).collect()
}

#[async_trait]
impl CartStore for PostgresCartStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }

        Ok(PostgresTransaction { tx })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn stock_levels(&self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>> {
        let rows = sqlx::query("SELECT id, stock FROM books WHERE id = ANY($1)")
            .bind(raw_ids(book_ids))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(stock_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_cart(&self, user_id: UserId) -> Result<Option<PersistedCart>> {
        let row: Option<PgRow> =
            sqlx::query("SELECT user_id, book_ids, updated_at FROM carts WHERE user_id = $1")
                .bind(user_id.get())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_cart).transpose()
    }
}

/// Transaction over a [`PostgresCartStore`].
///
/// Wraps a `sqlx` transaction, which rolls back when dropped uncommitted.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn read_cart(&mut self, user_id: UserId) -> Result<Option<PersistedCart>> {
        let row: Option<PgRow> =
            sqlx::query("SELECT user_id, book_ids, updated_at FROM carts WHERE user_id = $1")
                .bind(user_id.get())
                .fetch_optional(&mut *self.tx)
                .await?;

        row.map(PostgresCartStore::row_to_cart).transpose()
    }
}

#[async_trait]
impl CartTransaction for PostgresTransaction {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn lock_cart(&mut self, user_id: UserId) -> Result<Option<PersistedCart>> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id.get())
            .execute(&mut *self.tx)
            .await?;

        self.read_cart(user_id).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn try_lock_cart(&mut self, user_id: UserId) -> Result<CartLock> {
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(user_id.get())
            .fetch_one(&mut *self.tx)
            .await?;

        if !acquired {
            return Ok(CartLock::Busy);
        }
        Ok(CartLock::Acquired(self.read_cart(user_id).await?))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn read_stock(&mut self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>> {
        let rows = sqlx::query("SELECT id, stock FROM books WHERE id = ANY($1)")
            .bind(raw_ids(book_ids))
            .fetch_all(&mut *self.tx)
            .await?;

        rows.into_iter().map(stock_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn lock_and_read_stock(&mut self, book_ids: &[BookId]) -> Result<HashMap<BookId, i64>> {
        // Rows are locked in output order, which keeps lock order ascending.
        let rows = sqlx::query(
            "SELECT id, stock FROM books WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(raw_ids(book_ids))
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(stock_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn decrement_stock(&mut self, book_ids: &[BookId]) -> Result<()> {
        let ids = raw_ids(book_ids);
        let result = sqlx::query("UPDATE books SET stock = stock - 1 WHERE id = ANY($1)")
            .bind(ids.as_slice())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() != ids.len() as u64 {
            return Err(StoreError::ConstraintViolation(format!(
                "expected to reserve {} books, found {}",
                ids.len(),
                result.rows_affected()
            )));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn increment_stock(&mut self, book_ids: &[BookId]) -> Result<()> {
        sqlx::query("UPDATE books SET stock = stock + 1 WHERE id = ANY($1)")
            .bind(raw_ids(book_ids))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, cart), fields(user_id = %cart.user_id()))]
    async fn upsert_cart(&mut self, cart: &Cart, updated_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO carts (user_id, book_ids, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                book_ids = EXCLUDED.book_ids,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(cart.user_id().get())
        .bind(raw_ids(&cart.to_vec()))
        .bind(updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_cart(&mut self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id.get())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn stale_carts(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UserId>> {
        let users: Vec<i64> =
            sqlx::query_scalar("SELECT user_id FROM carts WHERE updated_at < $1 ORDER BY user_id")
                .bind(cutoff)
                .fetch_all(&mut *self.tx)
                .await?;

        Ok(users.into_iter().map(UserId::new).collect())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
