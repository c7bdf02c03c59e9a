//! Transfer model and its approval state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// `pending -> {approved, rejected}`, `approved -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 5] = [
        TransactionStatus::Pending,
        TransactionStatus::Approved,
        TransactionStatus::Rejected,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Approved => "approved",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Rejected | TransactionStatus::Completed | TransactionStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Completed) | (Approved, Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown transaction status '{}'", s))
    }
}

impl TryFrom<String> for TransactionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An administrator's verdict on a pending transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Status the transfer moves to when this decision wins.
    pub fn target_status(&self) -> TransactionStatus {
        match self {
            Decision::Approve => TransactionStatus::Approved,
            Decision::Reject => TransactionStatus::Rejected,
        }
    }
}

/// Transfer entity.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub decided_by: Option<Uuid>,
    pub decided_utc: Option<DateTime<Utc>>,
    pub settled_utc: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// A validated request to move funds, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub description: Option<String>,
    pub created_by: Uuid,
}

impl NewTransfer {
    pub fn into_pending(self) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            source_account_id: self.source_account_id,
            destination_account_id: self.destination_account_id,
            amount: self.amount,
            currency: self.currency,
            idempotency_key: self.idempotency_key,
            description: self.description,
            status: TransactionStatus::Pending,
            created_by: self.created_by,
            created_utc: Utc::now(),
            decided_by: None,
            decided_utc: None,
            settled_utc: None,
            failure_reason: None,
        }
    }
}

impl Transaction {
    pub fn touches_account(&self, account_id: Uuid) -> bool {
        self.source_account_id == account_id || self.destination_account_id == account_id
    }
}

/// Listing filter shared by the client and admin projections.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub account_ids: Option<Vec<Uuid>>,
    pub limit: i64,
}

/// Per-status counts and volume for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct StatusSummary {
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    pub count: i64,
    pub total_amount: i64,
}
