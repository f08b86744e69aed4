//! Embedded lending store (SQLite)

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

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

/// Schema applied at connect time, mirroring the networked store. The two
/// stores keep independent member tables, so no foreign keys are declared;
/// dangling references are repaired by the reconciler.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS members (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        name TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'member',
        tier TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS books (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT,
        isbn TEXT,
        owner_id TEXT,
        count INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'available',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        book_id TEXT NOT NULL,
        member_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        borrowed_at TEXT NOT NULL,
        due_at TEXT NOT NULL,
        returned_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_member ON transactions(member_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_book ON transactions(book_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status)",
];

#[derive(Clone)]
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Open (or create) the embedded database and apply the schema
    pub async fn connect(config: &StorageConfig) -> AppResult<Self> {
        if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(format!("could not create data directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.sqlite_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.ensure_schema().await?;
        Ok(backend)
    }

    async fn ensure_schema(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    async fn find_transactions_by_member(&self, member_id: &str) -> AppResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE member_id = ? ORDER BY created_at DESC",
        )
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn find_active_borrow_count(&self, member_id: &str) -> AppResult<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE member_id = ? AND kind = 'borrow'
              AND status IN ('active', 'pending_return_approval')
            "#,
        )
        .bind(member_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_total_borrow_count(&self, member_id: &str) -> AppResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE member_id = ? AND kind = 'borrow'",
        )
        .bind(member_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn has_active_borrow(&self, member_id: &str, book_id: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM transactions
                WHERE member_id = ? AND book_id = ? AND kind = 'borrow'
                  AND status IN ('active', 'pending_return_approval')
            )
            "#,
        )
        .bind(member_id)
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn find_active_borrow_count_for_book(&self, book_id: &str) -> AppResult<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transactions
            WHERE book_id = ? AND kind = 'borrow'
              AND status IN ('active', 'pending_return_approval')
            "#,
        )
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_book_availability(&self, book_id: &str) -> AppResult<Option<BookAvailability>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT count, status FROM books WHERE id = ?",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
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
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn insert_transaction(&self, tx: &Transaction) -> AppResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions
                (id, book_id, member_id, kind, status,
                 borrowed_at, due_at, returned_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        .fetch_one(&self.pool)
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

        // SQLite numbers parameters by first appearance, so the binds
        // follow the statement's textual order.
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = ?,
                returned_at = CASE WHEN ? THEN ? ELSE returned_at END,
                due_at = CASE WHEN ? THEN ? ELSE due_at END,
                updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING *
            "#,
        )
        .bind(update.status.as_str())
        .bind(set_returned)
        .bind(returned_at)
        .bind(set_due)
        .bind(due_at)
        .bind(Utc::now())
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Transaction::try_from).transpose()
    }

    async fn adjust_book_count(&self, book_id: &str, delta: i64) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET count = MAX(count + ?, 0),
                status = CASE WHEN MAX(count + ?, 0) = 0
                              THEN 'borrowed' ELSE 'available' END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(delta)
        .bind(delta)
        .bind(Utc::now())
        .bind(book_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("book {} not found", book_id)));
        }
        Ok(())
    }

    async fn find_member(&self, member_id: &str) -> AppResult<Option<MemberProfile>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT id, email, name, role, tier FROM members WHERE id = ?",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MemberProfile::from))
    }

    async fn ensure_member_exists(&self, member_id: &str, fallback: &MemberProfile) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO members (id, email, name, role, tier, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
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
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::book::BookStatus;
    use crate::models::member::PlanTier;
    use crate::models::transaction::TransactionKind;
    use chrono::Duration;

    // A single connection keeps the whole test on one in-memory database.
    async fn backend() -> SqliteBackend {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let backend = SqliteBackend { pool };
        backend.ensure_schema().await.expect("schema");
        backend
    }

    fn borrow_tx(id: &str, member_id: &str, book_id: &str) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: id.to_string(),
            book_id: book_id.to_string(),
            member_id: member_id.to_string(),
            kind: TransactionKind::Borrow,
            status: TransactionStatus::Active,
            borrowed_at: now,
            due_at: now + Duration::days(5),
            returned_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seed_book(backend: &SqliteBackend, id: &str, count: i64) {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO books (id, title, count, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(format!("Book {}", id))
        .bind(count)
        .bind(BookStatus::for_count(count).as_str())
        .bind(now)
        .bind(now)
        .execute(&backend.pool)
        .await
        .expect("seed book");
    }

    #[tokio::test]
    async fn test_insert_and_fetch_round_trip() {
        let backend = backend().await;
        let tx = borrow_tx("t1", "alice", "b1");

        let created = backend.insert_transaction(&tx).await.expect("insert");
        assert_eq!(created.status, TransactionStatus::Active);

        let fetched = backend.get_transaction("t1").await.expect("get");
        assert_eq!(fetched, Some(created));

        assert_eq!(backend.find_active_borrow_count("alice").await.unwrap(), 1);
        assert_eq!(backend.find_total_borrow_count("alice").await.unwrap(), 1);
        assert!(backend.has_active_borrow("alice", "b1").await.unwrap());
        assert!(!backend.has_active_borrow("alice", "b2").await.unwrap());
    }

    #[tokio::test]
    async fn test_guarded_update_requires_expected_status() {
        let backend = backend().await;
        backend.insert_transaction(&borrow_tx("t1", "alice", "b1")).await.unwrap();

        let update = StatusUpdate::to(TransactionStatus::PendingReturnApproval)
            .set_returned_at(Utc::now());

        // Wrong expected status: zero rows affected.
        let missed = backend
            .update_transaction_status("t1", TransactionStatus::PendingReturnApproval, &update)
            .await
            .unwrap();
        assert!(missed.is_none());

        let updated = backend
            .update_transaction_status("t1", TransactionStatus::Active, &update)
            .await
            .unwrap()
            .expect("first guarded update succeeds");
        assert_eq!(updated.status, TransactionStatus::PendingReturnApproval);
        assert!(updated.returned_at.is_some());

        // The same transition a second time loses the guard.
        let second = backend
            .update_transaction_status("t1", TransactionStatus::Active, &update)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_clear_returned_at_on_rejection() {
        let backend = backend().await;
        backend.insert_transaction(&borrow_tx("t1", "alice", "b1")).await.unwrap();

        let pending = StatusUpdate::to(TransactionStatus::PendingReturnApproval)
            .set_returned_at(Utc::now());
        backend
            .update_transaction_status("t1", TransactionStatus::Active, &pending)
            .await
            .unwrap()
            .expect("to pending");

        let reinstated = StatusUpdate::to(TransactionStatus::Active).clear_returned_at();
        let tx = backend
            .update_transaction_status("t1", TransactionStatus::PendingReturnApproval, &reinstated)
            .await
            .unwrap()
            .expect("back to active");
        assert_eq!(tx.status, TransactionStatus::Active);
        assert!(tx.returned_at.is_none());
    }

    #[tokio::test]
    async fn test_adjust_book_count_floors_at_zero() {
        let backend = backend().await;
        seed_book(&backend, "b1", 1).await;

        backend.adjust_book_count("b1", -1).await.unwrap();
        let availability = backend.get_book_availability("b1").await.unwrap().unwrap();
        assert_eq!(availability.count, 0);
        assert_eq!(availability.status, BookStatus::Borrowed);

        // Flooring: a second decrement cannot go negative.
        backend.adjust_book_count("b1", -1).await.unwrap();
        let availability = backend.get_book_availability("b1").await.unwrap().unwrap();
        assert_eq!(availability.count, 0);

        backend.adjust_book_count("b1", 1).await.unwrap();
        let availability = backend.get_book_availability("b1").await.unwrap().unwrap();
        assert_eq!(availability.count, 1);
        assert_eq!(availability.status, BookStatus::Available);

        let missing = backend.adjust_book_count("nope", 1).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_ensure_member_is_idempotent() {
        let backend = backend().await;
        assert!(backend.find_member("alice").await.unwrap().is_none());

        let mut profile = MemberProfile::placeholder("alice");
        profile.tier = Some(PlanTier::Silver);
        backend.ensure_member_exists("alice", &profile).await.unwrap();

        let stored = backend.find_member("alice").await.unwrap().expect("created");
        assert_eq!(stored.tier, Some(PlanTier::Silver));

        // A second ensure with different data does not overwrite.
        let other = MemberProfile::placeholder("alice");
        backend.ensure_member_exists("alice", &other).await.unwrap();
        let stored = backend.find_member("alice").await.unwrap().expect("still there");
        assert_eq!(stored.tier, Some(PlanTier::Silver));
    }
}
