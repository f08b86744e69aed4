//! Lending transaction model and lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction kinds persisted by the stores.
///
/// Only `Borrow` transactions participate in the lending state machine;
/// reservations and purchases are tracked by other subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Borrow,
    Return,
    Reserve,
    Cancel,
    Buy,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Borrow => "borrow",
            TransactionKind::Return => "return",
            TransactionKind::Reserve => "reserve",
            TransactionKind::Cancel => "cancel",
            TransactionKind::Buy => "buy",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrow" => Ok(TransactionKind::Borrow),
            "return" => Ok(TransactionKind::Return),
            "reserve" => Ok(TransactionKind::Reserve),
            "cancel" => Ok(TransactionKind::Cancel),
            "buy" => Ok(TransactionKind::Buy),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// Lifecycle status of a borrow transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    PendingReturnApproval,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::PendingReturnApproval => "pending_return_approval",
            TransactionStatus::Completed => "completed",
        }
    }

    /// Statuses that count as an open loan against a book and a member
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Active | TransactionStatus::PendingReturnApproval
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TransactionStatus::Active),
            "pending_return_approval" => Ok(TransactionStatus::PendingReturnApproval),
            "completed" => Ok(TransactionStatus::Completed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// One lending event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub book_id: String,
    pub member_id: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial assignment of a nullable or replaceable column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Keep
    }
}

/// Field changes applied together with a status transition.
///
/// Backends apply this only while the row still carries the expected
/// current status, so concurrent transitions cannot both succeed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub returned_at: Field<DateTime<Utc>>,
    pub due_at: Field<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn to(status: TransactionStatus) -> Self {
        Self {
            status,
            returned_at: Field::Keep,
            due_at: Field::Keep,
        }
    }

    pub fn set_returned_at(mut self, at: DateTime<Utc>) -> Self {
        self.returned_at = Field::Set(at);
        self
    }

    pub fn clear_returned_at(mut self) -> Self {
        self.returned_at = Field::Clear;
        self
    }

    pub fn set_due_at(mut self, at: DateTime<Utc>) -> Self {
        self.due_at = Field::Set(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_storage_round_trip() {
        for status in [
            TransactionStatus::Active,
            TransactionStatus::PendingReturnApproval,
            TransactionStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_open_statuses() {
        assert!(TransactionStatus::Active.is_open());
        assert!(TransactionStatus::PendingReturnApproval.is_open());
        assert!(!TransactionStatus::Completed.is_open());
    }

    #[test]
    fn test_kind_storage_round_trip() {
        assert_eq!("borrow".parse::<TransactionKind>(), Ok(TransactionKind::Borrow));
        assert_eq!(TransactionKind::Buy.as_str(), "buy");
        assert!("loan".parse::<TransactionKind>().is_err());
    }
}
