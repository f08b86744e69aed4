//! Member profile and lending plan types

use serde::{Deserialize, Serialize};

/// Subscription tiers known to the lending core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Bronze,
    Silver,
    Gold,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Bronze => "bronze",
            PlanTier::Silver => "silver",
            PlanTier::Gold => "gold",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "bronze" => Ok(PlanTier::Bronze),
            "silver" => Ok(PlanTier::Silver),
            "gold" => Ok(PlanTier::Gold),
            other => Err(format!("unknown plan tier '{}'", other)),
        }
    }
}

/// Limits granted by a subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LendingPlan {
    pub tier: PlanTier,
    /// Total loans a member may take on this plan
    pub lending_limit: i64,
    /// Loans a member may hold open at the same time
    pub concurrent_limit: i64,
}

impl LendingPlan {
    pub fn for_tier(tier: PlanTier) -> Self {
        let (lending_limit, concurrent_limit) = match tier {
            PlanTier::Free => (2, 1),
            PlanTier::Bronze => (5, 1),
            PlanTier::Silver => (10, 2),
            PlanTier::Gold => (20, 2),
        };
        Self {
            tier,
            lending_limit,
            concurrent_limit,
        }
    }

    /// The most generous plan, assumed when plan resolution fails
    pub fn most_permissive() -> Self {
        Self::for_tier(PlanTier::Gold)
    }
}

/// Minimal member profile the core consumes, and writes when repairing a
/// dangling member reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub tier: Option<PlanTier>,
}

impl MemberProfile {
    /// Synthesized profile used when no donor record can be found anywhere
    pub fn placeholder(member_id: &str) -> Self {
        Self {
            id: member_id.to_string(),
            email: format!("{}@placeholder.invalid", member_id),
            name: "Unknown member".to_string(),
            role: "member".to_string(),
            tier: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_table() {
        assert_eq!(LendingPlan::for_tier(PlanTier::Free).lending_limit, 2);
        assert_eq!(LendingPlan::for_tier(PlanTier::Free).concurrent_limit, 1);
        assert_eq!(LendingPlan::for_tier(PlanTier::Bronze).lending_limit, 5);
        assert_eq!(LendingPlan::for_tier(PlanTier::Silver).concurrent_limit, 2);
        assert_eq!(LendingPlan::for_tier(PlanTier::Gold).lending_limit, 20);
    }

    #[test]
    fn test_most_permissive_is_gold() {
        let plan = LendingPlan::most_permissive();
        assert_eq!(plan.tier, PlanTier::Gold);
        assert!(plan.lending_limit >= LendingPlan::for_tier(PlanTier::Silver).lending_limit);
    }

    #[test]
    fn test_placeholder_profile() {
        let profile = MemberProfile::placeholder("m-42");
        assert_eq!(profile.id, "m-42");
        assert_eq!(profile.email, "m-42@placeholder.invalid");
        assert!(profile.tier.is_none());
    }
}
