//! Book availability ledger

use crate::repository::StorageBackend;

/// Adjusts book counts in reaction to committed transaction changes.
///
/// Never runs ahead of a write. A failed adjustment is logged as inventory
/// drift for the out-of-band reconciliation pass instead of being
/// propagated or rolled back: the transaction row is the source of truth
/// for who owes what, and drifted counts are recomputable.
#[derive(Clone, Default)]
pub struct InventoryLedger;

impl InventoryLedger {
    pub fn new() -> Self {
        Self
    }

    /// A borrow was committed: one copy leaves the shelf.
    pub async fn on_borrow_committed(&self, backend: &dyn StorageBackend, book_id: &str) {
        if let Err(e) = backend.adjust_book_count(book_id, -1).await {
            tracing::error!(
                "inventory drift on {} store: failed to decrement book {} after borrow: {}",
                backend.kind(),
                book_id,
                e
            );
        }
    }

    /// A return was requested: the copy is back on the shelf immediately,
    /// before administrative approval.
    pub async fn on_return_committed(&self, backend: &dyn StorageBackend, book_id: &str) {
        if let Err(e) = backend.adjust_book_count(book_id, 1).await {
            tracing::error!(
                "inventory drift on {} store: failed to increment book {} after return: {}",
                backend.kind(),
                book_id,
                e
            );
        }
    }

    /// A return was rejected: the loan is reinstated, so the increment
    /// applied at request time is reversed.
    pub async fn on_return_rejected(&self, backend: &dyn StorageBackend, book_id: &str) {
        if let Err(e) = backend.adjust_book_count(book_id, -1).await {
            tracing::error!(
                "inventory drift on {} store: failed to re-decrement book {} after rejected return: {}",
                backend.kind(),
                book_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::repository::{BackendKind, MockStorageBackend};

    #[tokio::test]
    async fn test_borrow_decrements_and_return_increments() {
        let mut mock = MockStorageBackend::new();
        mock.expect_adjust_book_count()
            .withf(|book_id, delta| book_id == "b1" && *delta == -1)
            .times(1)
            .returning(|_, _| Ok(()));
        InventoryLedger::new().on_borrow_committed(&mock, "b1").await;

        let mut mock = MockStorageBackend::new();
        mock.expect_adjust_book_count()
            .withf(|book_id, delta| book_id == "b1" && *delta == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        InventoryLedger::new().on_return_committed(&mock, "b1").await;
    }

    #[tokio::test]
    async fn test_ledger_failure_is_swallowed() {
        let mut mock = MockStorageBackend::new();
        mock.expect_kind().return_const(BackendKind::Embedded);
        mock.expect_adjust_book_count()
            .returning(|_, _| Err(AppError::NotFound("book b1 not found".to_string())));

        // Must not panic or propagate: drift is logged for reconciliation.
        InventoryLedger::new().on_borrow_committed(&mock, "b1").await;
    }
}
