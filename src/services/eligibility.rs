//! Borrow eligibility rules

use crate::{
    error::{AppError, AppResult},
    models::member::{LendingPlan, MemberProfile},
    repository::StorageBackend,
};

/// Evaluates whether a borrow request is legal against one backend.
///
/// Checks run in order and short-circuit on the first failure. Every
/// rejection is a `Conflict` carrying the rule that failed and the counts
/// involved; the caller must change the request rather than retry.
#[derive(Clone, Default)]
pub struct EligibilityChecker;

impl EligibilityChecker {
    pub fn new() -> Self {
        Self
    }

    pub async fn validate_borrow(
        &self,
        backend: &dyn StorageBackend,
        member_id: &str,
        book_id: &str,
    ) -> AppResult<()> {
        let plan = self.resolve_plan(backend, member_id).await?;

        // The concurrent check runs before the total-limit check so its
        // more specific message is not masked.
        let open = backend.find_active_borrow_count(member_id).await?;
        if open >= plan.concurrent_limit {
            return Err(AppError::Conflict(format!(
                "concurrent lending limit reached: {} of {} loans open on the {} plan",
                open, plan.concurrent_limit, plan.tier
            )));
        }

        let total = backend.find_total_borrow_count(member_id).await?;
        if total >= plan.lending_limit {
            return Err(AppError::Conflict(format!(
                "lending limit reached: {} of {} loans taken on the {} plan",
                total, plan.lending_limit, plan.tier
            )));
        }

        // Duplicate loans of the same title are disallowed even when other
        // copies remain on the shelf.
        if backend.has_active_borrow(member_id, book_id).await? {
            return Err(AppError::Conflict(format!(
                "book {} is already on loan to this member",
                book_id
            )));
        }

        let availability = backend
            .get_book_availability(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("book {} not found", book_id)))?;
        let open_for_book = backend.find_active_borrow_count_for_book(book_id).await?;
        if availability.count - open_for_book <= 0 {
            return Err(AppError::Conflict(format!(
                "book {} is not available: all copies are on loan",
                book_id
            )));
        }

        Ok(())
    }

    /// Resolve the member's lending plan. An unknown member or tier falls
    /// back to the most permissive plan; the fallback is logged, never
    /// silent.
    async fn resolve_plan(
        &self,
        backend: &dyn StorageBackend,
        member_id: &str,
    ) -> AppResult<LendingPlan> {
        match backend.find_member(member_id).await? {
            Some(MemberProfile { tier: Some(tier), .. }) => Ok(LendingPlan::for_tier(tier)),
            _ => {
                let plan = LendingPlan::most_permissive();
                tracing::warn!(
                    "could not resolve a lending plan for member {}, assuming the {} plan",
                    member_id,
                    plan.tier
                );
                Ok(plan)
            }
        }
    }
}
