//! Lending state machine and public lending operations

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::transaction::{StatusUpdate, Transaction, TransactionKind, TransactionStatus},
    repository::{selector::StorageSelector, BackendKind, StorageBackend},
};

use super::{eligibility::EligibilityChecker, inventory::InventoryLedger, reconcile::MemberReconciler};

/// Loan period applied to new borrows and renewals, in days
pub const LOAN_PERIOD_DAYS: i64 = 5;

// Renewal is allowed from 1 day (inclusive) to 2 days (exclusive) before
// the due date, measured in whole seconds.
const RENEW_WINDOW_MIN_SECS: i64 = 86_400;
const RENEW_WINDOW_MAX_SECS: i64 = 172_800;

/// True when `due` lies inside the renewal window relative to `now`
fn renew_window_allows(now: DateTime<Utc>, due: DateTime<Utc>) -> bool {
    let secs = (due - now).num_seconds();
    (RENEW_WINDOW_MIN_SECS..RENEW_WINDOW_MAX_SECS).contains(&secs)
}

/// Owns the lifecycle of lending transactions: borrow, return request,
/// administrative approval or rejection, and in-place renewal.
///
/// The backend is resolved once per operation; every read and write of that
/// operation stays on the resolved store unless an explicit, logged read
/// fallback redirects the whole remainder of the request.
#[derive(Clone)]
pub struct LendingService {
    selector: StorageSelector,
    eligibility: EligibilityChecker,
    ledger: InventoryLedger,
    reconciler: MemberReconciler,
}

impl LendingService {
    pub fn new(selector: StorageSelector) -> Self {
        Self {
            selector,
            eligibility: EligibilityChecker::new(),
            ledger: InventoryLedger::new(),
            reconciler: MemberReconciler::new(),
        }
    }

    /// Borrow a book: validate eligibility, repair the member reference,
    /// write the transaction, then let the ledger react.
    pub async fn create_borrow(&self, member_id: &str, book_id: &str) -> AppResult<Transaction> {
        let mut backend = self.selector.resolve();

        // Eligibility reads may fall back once to the secondary store; the
        // write then stays on whichever store the checks ran against, so
        // validation and write can never land on different stores.
        if let Err(e) = self
            .eligibility
            .validate_borrow(backend.as_ref(), member_id, book_id)
            .await
        {
            if !e.is_backend_failure() {
                return Err(e);
            }
            backend = self.read_fallback(backend.kind(), e)?;
            self.eligibility
                .validate_borrow(backend.as_ref(), member_id, book_id)
                .await?;
        }

        let donor = self.selector.counterpart(backend.kind());
        self.reconciler
            .ensure_member(backend.as_ref(), Some(donor.as_ref()), member_id)
            .await?;

        let now = Utc::now();
        let tx = Transaction {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            member_id: member_id.to_string(),
            kind: TransactionKind::Borrow,
            status: TransactionStatus::Active,
            borrowed_at: now,
            due_at: now + Duration::days(LOAN_PERIOD_DAYS),
            returned_at: None,
            created_at: now,
            updated_at: now,
        };

        // A failed write surfaces as-is: the transaction may already exist
        // on the far side, so it is never re-attempted on the other store.
        let created = backend.insert_transaction(&tx).await?;
        tracing::info!(
            "member {} borrowed book {} on the {} store, due {}",
            member_id,
            book_id,
            backend.kind(),
            created.due_at
        );

        self.ledger.on_borrow_committed(backend.as_ref(), book_id).await;
        Ok(created)
    }

    /// Member requests to return a borrowed book. The copy is treated as
    /// back on the shelf immediately, before administrative approval.
    pub async fn request_return(&self, transaction_id: &str, member_id: &str) -> AppResult<Transaction> {
        let backend = self.selector.resolve();
        let tx = self
            .get_member_borrow(backend.as_ref(), transaction_id, member_id)
            .await?;

        if tx.status != TransactionStatus::Active {
            return Err(Self::return_state_conflict(transaction_id, tx.status));
        }

        let update = StatusUpdate::to(TransactionStatus::PendingReturnApproval)
            .set_returned_at(Utc::now());
        match backend
            .update_transaction_status(transaction_id, TransactionStatus::Active, &update)
            .await?
        {
            Some(updated) => {
                tracing::info!(
                    "return of transaction {} requested by member {}",
                    transaction_id,
                    member_id
                );
                self.ledger
                    .on_return_committed(backend.as_ref(), &updated.book_id)
                    .await;
                Ok(updated)
            }
            // Zero rows affected: a concurrent request won the guard.
            // Re-fetch to name the state this request lost to.
            None => match backend.get_transaction(transaction_id).await? {
                Some(current) => Err(Self::return_state_conflict(transaction_id, current.status)),
                None => Err(AppError::NotFound(format!(
                    "no transaction {} exists",
                    transaction_id
                ))),
            },
        }
    }

    /// Administrative approval of a pending return. The inventory increment
    /// already happened when the return was requested.
    pub async fn approve_return(&self, transaction_id: &str, approver_id: &str) -> AppResult<Transaction> {
        let backend = self.selector.resolve();
        let update = StatusUpdate::to(TransactionStatus::Completed);
        match backend
            .update_transaction_status(transaction_id, TransactionStatus::PendingReturnApproval, &update)
            .await?
        {
            Some(updated) => {
                tracing::info!(
                    "return of transaction {} approved by {}",
                    transaction_id,
                    approver_id
                );
                Ok(updated)
            }
            None => Err(self.no_pending_return(backend.as_ref(), transaction_id).await),
        }
    }

    /// Administrative rejection of a pending return: the loan is reinstated
    /// and the shelf copy granted at request time is taken back.
    pub async fn reject_return(
        &self,
        transaction_id: &str,
        approver_id: &str,
        reason: Option<&str>,
    ) -> AppResult<Transaction> {
        let backend = self.selector.resolve();
        let update = StatusUpdate::to(TransactionStatus::Active).clear_returned_at();
        match backend
            .update_transaction_status(transaction_id, TransactionStatus::PendingReturnApproval, &update)
            .await?
        {
            Some(updated) => {
                tracing::info!(
                    "return of transaction {} rejected by {}: {}",
                    transaction_id,
                    approver_id,
                    reason.unwrap_or("no reason given")
                );
                self.ledger
                    .on_return_rejected(backend.as_ref(), &updated.book_id)
                    .await;
                Ok(updated)
            }
            None => Err(self.no_pending_return(backend.as_ref(), transaction_id).await),
        }
    }

    /// Extend an active loan in place when its due date is 1 to 2 days away
    pub async fn renew(&self, transaction_id: &str, member_id: &str) -> AppResult<Transaction> {
        let backend = self.selector.resolve();
        let tx = self
            .get_member_borrow(backend.as_ref(), transaction_id, member_id)
            .await?;

        if tx.status != TransactionStatus::Active {
            return Err(AppError::NotFound(format!(
                "loan {} is not active (status is {})",
                transaction_id, tx.status
            )));
        }

        let now = Utc::now();
        if !renew_window_allows(now, tx.due_at) {
            let days_left = (tx.due_at - now).num_seconds() as f64 / 86_400.0;
            return Err(AppError::Validation(format!(
                "loan can only be renewed between 2 days and 1 day before it is due ({:.1} days left)",
                days_left
            )));
        }

        let update = StatusUpdate::to(TransactionStatus::Active)
            .set_due_at(now + Duration::days(LOAN_PERIOD_DAYS));
        match backend
            .update_transaction_status(transaction_id, TransactionStatus::Active, &update)
            .await?
        {
            Some(updated) => {
                tracing::info!("loan {} renewed, now due {}", transaction_id, updated.due_at);
                Ok(updated)
            }
            // The loan changed state between the fetch and the guard.
            None => Err(AppError::NotFound(format!(
                "loan {} is no longer active",
                transaction_id
            ))),
        }
    }

    /// All transactions recorded for a member on the authoritative store
    pub async fn member_transactions(&self, member_id: &str) -> AppResult<Vec<Transaction>> {
        let backend = self.selector.resolve();
        match backend.find_transactions_by_member(member_id).await {
            Ok(transactions) => Ok(transactions),
            Err(e) if e.is_backend_failure() => {
                let secondary = self.read_fallback(backend.kind(), e)?;
                secondary.find_transactions_by_member(member_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a borrow transaction and verify it belongs to the member. A
    /// wrong owner reads as missing so loans are not leaked across members.
    async fn get_member_borrow(
        &self,
        backend: &dyn StorageBackend,
        transaction_id: &str,
        member_id: &str,
    ) -> AppResult<Transaction> {
        let tx = backend
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no transaction {} exists", transaction_id)))?;

        if tx.member_id != member_id || tx.kind != TransactionKind::Borrow {
            return Err(AppError::NotFound(format!(
                "no loan {} exists for member {}",
                transaction_id, member_id
            )));
        }
        Ok(tx)
    }

    fn return_state_conflict(transaction_id: &str, status: TransactionStatus) -> AppError {
        match status {
            TransactionStatus::PendingReturnApproval => AppError::Conflict(format!(
                "return of transaction {} is already pending approval",
                transaction_id
            )),
            TransactionStatus::Completed => AppError::Conflict(format!(
                "transaction {} is already returned and completed",
                transaction_id
            )),
            TransactionStatus::Active => AppError::Conflict(format!(
                "transaction {} was concurrently modified, re-query and try again",
                transaction_id
            )),
        }
    }

    /// Why an approve/reject found nothing to act on
    async fn no_pending_return(&self, backend: &dyn StorageBackend, transaction_id: &str) -> AppError {
        match backend.get_transaction(transaction_id).await {
            Ok(Some(tx)) => AppError::NotFound(format!(
                "transaction {} has no return awaiting approval (status is {})",
                transaction_id, tx.status
            )),
            Ok(None) => AppError::NotFound(format!("no transaction {} exists", transaction_id)),
            Err(e) => e,
        }
    }

    /// Redirect the remainder of a request to the secondary store after a
    /// read failure, when the selection policy allows it.
    fn read_fallback(&self, failed: BackendKind, cause: AppError) -> AppResult<Arc<dyn StorageBackend>> {
        if let Some(secondary) = self.selector.fallback_for(failed) {
            tracing::warn!(
                "{} store failed during reads ({}); continuing this request on the {} store",
                failed,
                cause,
                secondary.kind()
            );
            return Ok(secondary);
        }
        if failed == BackendKind::Embedded {
            return Err(AppError::BackendUnavailable(format!(
                "no lending store is reachable: {}",
                cause
            )));
        }
        Err(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_window_inclusive_at_one_day() {
        let now = Utc::now();
        assert!(renew_window_allows(now, now + Duration::days(1)));
    }

    #[test]
    fn test_renew_window_rejects_under_one_day() {
        let now = Utc::now();
        assert!(!renew_window_allows(now, now + Duration::days(1) - Duration::seconds(1)));
    }

    #[test]
    fn test_renew_window_exclusive_at_two_days() {
        let now = Utc::now();
        assert!(!renew_window_allows(now, now + Duration::days(2)));
        assert!(renew_window_allows(now, now + Duration::days(2) - Duration::seconds(1)));
    }

    #[test]
    fn test_renew_window_middle() {
        let now = Utc::now();
        assert!(renew_window_allows(now, now + Duration::hours(36)));
    }

    #[test]
    fn test_renew_window_rejects_overdue_and_far_future() {
        let now = Utc::now();
        assert!(!renew_window_allows(now, now - Duration::days(1)));
        assert!(!renew_window_allows(now, now + Duration::days(5)));
    }
}
