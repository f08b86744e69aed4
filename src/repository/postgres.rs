//! Networked lending store (PostgreSQL)

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

use crate::{
    config::StorageConfig,
    error::{AppError, AppResult},
    models::{
        book::BookAvailability,
        member::MemberProfile,
        transaction::{StatusUpdate, Transaction, TransactionStatus},
    },
};

use super::{field_params, BackendKind, MemberRow, StorageBackend, TransactionRow};

#[derive(Clone)]
pub struct PostgresBackend {
    pool: Pool<Postgres>,
    timeout: Duration,
}

impl PostgresBackend {
    /// Build the connection pool without touching the network; reachability
    /// is established by the startup health probe.
    pub fn connect_lazy(config: &StorageConfig) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_lazy(&config.postgres_url)?;

        Ok(Self {
            pool,
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// One-shot reachability check used to seed the cached health flag
    pub async fn probe(&self) -> bool {
        self.guarded(
            "health probe",
            sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool),
        )
        .await
        .is_ok()
    }

    /// Apply the lending schema
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("migration failed: {}", e)))
    }

    /// Every networked call runs under the configured timeout; an elapsed
    /// timeout is treated as a failed call, never retried here.
    async fn guarded<T, F>(&self, op: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AppError::BackendUnavailable(format!(
                "networked store timed out after {:?} during {}",
                self.timeout, op
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Networked
    }

    async fn find_transactions_by_member(&self, member_id: &str) -> AppResult<Vec<Transaction>> {
        let rows = self
            .guarded(
                "find transactions by member",
                sqlx::query_as::<_, TransactionRow>(
                    "SELECT * FROM transactions WHERE member_id = $1 ORDER BY created_at DESC",
                )
                .bind(member_id)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn find_active_borrow_count(&self, member_id: &str) -> AppResult<i64> {
        self.guarded(
            "count open borrows",
            sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM transactions
                WHERE member_id = $1 AND kind = 'borrow'
                  AND status IN ('active', 'pending_return_approval')
                "#,
            )
            .bind(member_id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn find_total_borrow_count(&self, member_id: &str) -> AppResult<i64> {
        self.guarded(
            "count total borrows",
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM transactions WHERE member_id = $1 AND kind = 'borrow'",
            )
            .bind(member_id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn has_active_borrow(&self, member_id: &str, book_id: &str) -> AppResult<bool> {
        self.guarded(
            "check duplicate borrow",
            sqlx::query_scalar(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM transactions
                    WHERE member_id = $1 AND book_id = $2 AND kind = 'borrow'
                      AND status IN ('active', 'pending_return_approval')
                )
                "#,
            )
            .bind(member_id)
            .bind(book_id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn find_active_borrow_count_for_book(&self, book_id: &str) -> AppResult<i64> {
        self.guarded(
            "count open borrows for book",
            sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM transactions
                WHERE book_id = $1 AND kind = 'borrow'
                  AND status IN ('active', 'pending_return_approval')
                "#,
            )
            .bind(book_id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn get_book_availability(&self, book_id: &str) -> AppResult<Option<BookAvailability>> {
        let row = self
            .guarded(
                "get book availability",
                sqlx::query_as::<_, (i64, String)>(
                    "SELECT count, status FROM books WHERE id = $1",
                )
                .bind(book_id)
                .fetch_optional(&self.pool),
            )
            .await?;

        row.map(|(count, status)| {
            Ok(BookAvailability {
                count,
                status: status.parse().map_err(AppError::Internal)?,
            })
        })
        .transpose()
    }

    async fn get_transaction(&self, id: &str) -> AppResult<Option<Transaction>> {
        let row = self
            .guarded(
                "get transaction",
                sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn insert_transaction(&self, tx: &Transaction) -> AppResult<Transaction> {
        let row = self
            .guarded(
                "insert transaction",
                sqlx::query_as::<_, TransactionRow>(
                    r#"
                    INSERT INTO transactions
                        (id, book_id, member_id, kind, status,
                         borrowed_at, due_at, returned_at, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    RETURNING *
                    "#,
                )
                .bind(&tx.id)
                .bind(&tx.book_id)
                .bind(&tx.member_id)
                .bind(tx.kind.as_str())
                .bind(tx.status.as_str())
                .bind(tx.borrowed_at)
                .bind(tx.due_at)
                .bind(tx.returned_at)
                .bind(tx.created_at)
                .bind(tx.updated_at)
                .fetch_one(&self.pool),
            )
            .await?;

        Transaction::try_from(row)
    }

    async fn update_transaction_status(
        &self,
        id: &str,
        expected: TransactionStatus,
        update: &StatusUpdate,
    ) -> AppResult<Option<Transaction>> {
        let (set_returned, returned_at) = field_params(&update.returned_at);
        let (set_due, due_at) = field_params(&update.due_at);

        let row = self
            .guarded(
                "guarded status update",
                sqlx::query_as::<_, TransactionRow>(
                    r#"
                    UPDATE transactions
                    SET status = $3,
                        returned_at = CASE WHEN $4 THEN $5 ELSE returned_at END,
                        due_at = CASE WHEN $6 THEN $7 ELSE due_at END,
                        updated_at = $8
                    WHERE id = $1 AND status = $2
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(expected.as_str())
                .bind(update.status.as_str())
                .bind(set_returned)
                .bind(returned_at)
                .bind(set_due)
                .bind(due_at)
                .bind(Utc::now())
                .fetch_optional(&self.pool),
            )
            .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn adjust_book_count(&self, book_id: &str, delta: i64) -> AppResult<()> {
        let result = self
            .guarded(
                "adjust book count",
                sqlx::query(
                    r#"
                    UPDATE books
                    SET count = GREATEST(count + $2, 0),
                        status = CASE WHEN GREATEST(count + $2, 0) = 0
                                      THEN 'borrowed' ELSE 'available' END,
                        updated_at = $3
                    WHERE id = $1
                    "#,
                )
                .bind(book_id)
                .bind(delta)
                .bind(Utc::now())
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("book {} not found", book_id)));
        }
        Ok(())
    }

    async fn find_member(&self, member_id: &str) -> AppResult<Option<MemberProfile>> {
        let row = self
            .guarded(
                "find member",
                sqlx::query_as::<_, MemberRow>(
                    "SELECT id, email, name, role, tier FROM members WHERE id = $1",
                )
                .bind(member_id)
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(MemberProfile::from))
    }

    async fn ensure_member_exists(&self, member_id: &str, fallback: &MemberProfile) -> AppResult<()> {
        let now = Utc::now();
        self.guarded(
            "ensure member exists",
            sqlx::query(
                r#"
                INSERT INTO members (id, email, name, role, tier, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(member_id)
            .bind(&fallback.email)
            .bind(&fallback.name)
            .bind(&fallback.role)
            .bind(fallback.tier.map(|t| t.as_str()))
            .bind(now)
            .bind(now)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }
}
