//! Cross-store member reconciliation

use crate::{
    error::AppResult,
    models::member::MemberProfile,
    repository::StorageBackend,
};

/// Repairs dangling member references before a transaction write.
///
/// The two stores keep independent member tables, so a transaction may
/// reference a member the authoritative store has never seen. Rather than
/// letting the business operation fail on a dangling reference, the member
/// row is created on demand from the best available profile.
#[derive(Clone, Default)]
pub struct MemberReconciler;

impl MemberReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Ensure `member_id` exists in the authoritative store, donating a
    /// profile from the secondary store when one is available and
    /// synthesizing a placeholder otherwise.
    pub async fn ensure_member(
        &self,
        authoritative: &dyn StorageBackend,
        donor: Option<&dyn StorageBackend>,
        member_id: &str,
    ) -> AppResult<()> {
        if authoritative.find_member(member_id).await?.is_some() {
            return Ok(());
        }

        let donated = match donor {
            Some(other) => match other.find_member(member_id).await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(
                        "could not read member {} from the {} store: {}",
                        member_id,
                        other.kind(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let profile = donated.unwrap_or_else(|| {
            tracing::warn!(
                "no profile found anywhere for member {}, synthesizing a placeholder",
                member_id
            );
            MemberProfile::placeholder(member_id)
        });

        tracing::info!(
            "creating missing member {} on the {} store",
            member_id,
            authoritative.kind()
        );
        authoritative.ensure_member_exists(member_id, &profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::member::PlanTier;
    use crate::repository::{BackendKind, MockStorageBackend};

    fn profile(id: &str, tier: Option<PlanTier>) -> MemberProfile {
        MemberProfile {
            id: id.to_string(),
            email: format!("{}@example.org", id),
            name: "Someone".to_string(),
            role: "member".to_string(),
            tier,
        }
    }

    #[tokio::test]
    async fn test_existing_member_needs_no_repair() {
        let mut authoritative = MockStorageBackend::new();
        authoritative
            .expect_find_member()
            .returning(|id| Ok(Some(profile(id, Some(PlanTier::Free)))));
        authoritative.expect_ensure_member_exists().times(0);

        MemberReconciler::new()
            .ensure_member(&authoritative, None, "alice")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_member_is_donated_from_other_store() {
        let mut authoritative = MockStorageBackend::new();
        authoritative.expect_find_member().returning(|_| Ok(None));
        authoritative.expect_kind().return_const(BackendKind::Embedded);
        authoritative
            .expect_ensure_member_exists()
            .withf(|id, fallback| id == "bob" && fallback.email == "bob@example.org")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut donor = MockStorageBackend::new();
        donor
            .expect_find_member()
            .returning(|id| Ok(Some(profile(id, Some(PlanTier::Gold)))));

        MemberReconciler::new()
            .ensure_member(&authoritative, Some(&donor), "bob")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_placeholder_when_donor_fails() {
        let mut authoritative = MockStorageBackend::new();
        authoritative.expect_find_member().returning(|_| Ok(None));
        authoritative.expect_kind().return_const(BackendKind::Embedded);
        authoritative
            .expect_ensure_member_exists()
            .withf(|id, fallback| id == "ghost" && fallback.email == "ghost@placeholder.invalid")
            .times(1)
            .returning(|_, _| Ok(()));

        let mut donor = MockStorageBackend::new();
        donor.expect_kind().return_const(BackendKind::Networked);
        donor
            .expect_find_member()
            .returning(|_| Err(AppError::BackendUnavailable("down".to_string())));

        MemberReconciler::new()
            .ensure_member(&authoritative, Some(&donor), "ghost")
            .await
            .unwrap();
    }
}
