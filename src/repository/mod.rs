//! Storage backends for lending data
//!
//! Two independent stores implement the same contract: a networked Postgres
//! database and an embedded SQLite database. They share no transactions and
//! no referential integrity; the selector designates one of them as
//! authoritative per request.

pub mod postgres;
pub mod selector;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    config::StorageConfig,
    error::{AppError, AppResult},
    models::{
        book::BookAvailability,
        member::MemberProfile,
        transaction::{Field, StatusUpdate, Transaction, TransactionStatus},
    },
};

/// Identifies one of the two stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Networked,
    Embedded,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BackendKind::Networked => "networked",
            BackendKind::Embedded => "embedded",
        };
        write!(f, "{}", label)
    }
}

/// Uniform contract over the two lending stores.
///
/// `update_transaction_status` is guarded by the caller's expected current
/// status; zero rows affected returns `None`, and the caller must re-fetch
/// to tell a missing transaction from a state mismatch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn find_transactions_by_member(&self, member_id: &str) -> AppResult<Vec<Transaction>>;

    /// Open loans (active or pending return approval) held by a member
    async fn find_active_borrow_count(&self, member_id: &str) -> AppResult<i64>;

    /// Borrow transactions ever taken by a member, any status
    async fn find_total_borrow_count(&self, member_id: &str) -> AppResult<i64>;

    async fn has_active_borrow(&self, member_id: &str, book_id: &str) -> AppResult<bool>;

    /// Open loans currently held against a book
    async fn find_active_borrow_count_for_book(&self, book_id: &str) -> AppResult<i64>;

    async fn get_book_availability(&self, book_id: &str) -> AppResult<Option<BookAvailability>>;

    async fn get_transaction(&self, id: &str) -> AppResult<Option<Transaction>>;

    async fn insert_transaction(&self, tx: &Transaction) -> AppResult<Transaction>;

    /// Apply `update` only while the row still carries `expected` status
    async fn update_transaction_status(
        &self,
        id: &str,
        expected: TransactionStatus,
        update: &StatusUpdate,
    ) -> AppResult<Option<Transaction>>;

    /// Add `delta` to the book's count, floored at zero, rederiving status
    async fn adjust_book_count(&self, book_id: &str, delta: i64) -> AppResult<()>;

    async fn find_member(&self, member_id: &str) -> AppResult<Option<MemberProfile>>;

    /// Insert a minimal member row if none exists
    async fn ensure_member_exists(&self, member_id: &str, fallback: &MemberProfile) -> AppResult<()>;
}

/// Transaction row shape shared by both stores
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TransactionRow {
    pub id: String,
    pub book_id: String,
    pub member_id: String,
    pub kind: String,
    pub status: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> AppResult<Self> {
        Ok(Transaction {
            kind: row.kind.parse().map_err(AppError::Internal)?,
            status: row.status.parse().map_err(AppError::Internal)?,
            id: row.id,
            book_id: row.book_id,
            member_id: row.member_id,
            borrowed_at: row.borrowed_at,
            due_at: row.due_at,
            returned_at: row.returned_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Member row shape shared by both stores
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MemberRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub tier: Option<String>,
}

impl From<MemberRow> for MemberProfile {
    fn from(row: MemberRow) -> Self {
        MemberProfile {
            id: row.id,
            email: row.email,
            name: row.name,
            role: row.role,
            // An unknown tier reads as unresolved; the eligibility checker
            // logs and falls back to the most permissive plan.
            tier: row.tier.and_then(|t| t.parse().ok()),
        }
    }
}

/// Flag/value parameter pair for a partial column assignment
pub(crate) fn field_params<T: Copy>(field: &Field<T>) -> (bool, Option<T>) {
    match field {
        Field::Keep => (false, None),
        Field::Set(v) => (true, Some(*v)),
        Field::Clear => (true, None),
    }
}

/// Connect both stores, apply schema, probe networked health once, and
/// assemble the selector. The health flag is fixed for the life of the
/// process; a restart is required to re-detect networked recovery.
pub async fn connect_backends(config: &StorageConfig) -> AppResult<selector::StorageSelector> {
    let networked = postgres::PostgresBackend::connect_lazy(config)?;

    let networked_healthy = if networked.probe().await {
        match networked.migrate().await {
            Ok(()) => {
                tracing::info!("networked store is reachable");
                true
            }
            Err(e) => {
                tracing::warn!("networked store failed to migrate, marking unhealthy: {}", e);
                false
            }
        }
    } else {
        tracing::warn!(
            "networked store failed its startup health probe; auto mode will use the embedded store until restart"
        );
        false
    };

    let embedded = sqlite::SqliteBackend::connect(config).await?;
    tracing::info!("embedded store ready at {}", config.sqlite_path);

    Ok(selector::StorageSelector::new(
        Arc::new(networked),
        Arc::new(embedded),
        config.preference,
        Arc::new(selector::BackendHealth::new(networked_healthy)),
    ))
}
