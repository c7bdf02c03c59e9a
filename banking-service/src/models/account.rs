//! Account model. Amounts are integer minor units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub owner_id: Uuid,
    pub account_number: String,
    pub currency: String,
    /// Ledger balance, including funds held for pending transfers.
    pub balance: i64,
    pub held_balance: i64,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    pub fn new(owner_id: Uuid, account_number: String, currency: &str, balance: i64) -> Self {
        Self {
            account_id: Uuid::new_v4(),
            owner_id,
            account_number,
            currency: currency.to_uppercase(),
            balance,
            held_balance: 0,
            created_utc: Utc::now(),
        }
    }

    /// Balance not reserved by pending holds.
    pub fn available_balance(&self) -> i64 {
        self.balance - self.held_balance
    }

    pub fn is_owned_by(&self, identity_id: Uuid) -> bool {
        self.owner_id == identity_id
    }
}
