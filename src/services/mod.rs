//! Business logic services

pub mod eligibility;
pub mod inventory;
pub mod lending;
pub mod reconcile;

use crate::repository::selector::StorageSelector;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub lending: lending::LendingService,
}

impl Services {
    /// Create all services over the resolved storage selector
    pub fn new(selector: StorageSelector) -> Self {
        Self {
            lending: lending::LendingService::new(selector),
        }
    }
}
