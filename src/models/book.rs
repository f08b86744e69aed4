//! Book inventory model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived shelf status of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Available,
    Borrowed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::Borrowed => "borrowed",
        }
    }

    /// A book is `borrowed` exactly when no lendable copy remains
    pub fn for_count(count: i64) -> Self {
        if count == 0 {
            BookStatus::Borrowed
        } else {
            BookStatus::Available
        }
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(BookStatus::Available),
            "borrowed" => Ok(BookStatus::Borrowed),
            other => Err(format!("unknown book status '{}'", other)),
        }
    }
}

/// Inventory unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub owner_id: Option<String>,
    /// Remaining lendable copies; never negative
    pub count: i64,
    pub status: BookStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Availability snapshot read by the eligibility checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookAvailability {
    pub count: i64,
    pub status: BookStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_for_count() {
        assert_eq!(BookStatus::for_count(0), BookStatus::Borrowed);
        assert_eq!(BookStatus::for_count(1), BookStatus::Available);
        assert_eq!(BookStatus::for_count(7), BookStatus::Available);
    }
}
