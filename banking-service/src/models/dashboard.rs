//! Read-only projections for the client and admin dashboards.

use serde::Serialize;
use std::collections::BTreeMap;

use super::account::Account;
use super::transaction::{StatusSummary, Transaction, TransactionStatus};

/// Totals for one currency across a client's accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencyBalance {
    pub currency: String,
    pub total: i64,
    pub available: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientDashboard {
    pub accounts: Vec<Account>,
    pub balances: Vec<CurrencyBalance>,
    pub pending_count: usize,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub by_status: Vec<StatusSummary>,
    pub pending_count: i64,
    pub pending_volume: i64,
}

/// Sum balances per currency, ordered by currency code.
pub fn balances_by_currency(accounts: &[Account]) -> Vec<CurrencyBalance> {
    let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    for account in accounts {
        let entry = totals.entry(account.currency.as_str()).or_default();
        entry.0 += account.balance;
        entry.1 += account.available_balance();
    }
    totals
        .into_iter()
        .map(|(currency, (total, available))| CurrencyBalance {
            currency: currency.to_string(),
            total,
            available,
        })
        .collect()
}

impl AdminDashboard {
    pub fn from_summaries(by_status: Vec<StatusSummary>) -> Self {
        let (pending_count, pending_volume) = by_status
            .iter()
            .find(|s| s.status == TransactionStatus::Pending)
            .map(|s| (s.count, s.total_amount))
            .unwrap_or((0, 0));
        Self {
            by_status,
            pending_count,
            pending_volume,
        }
    }
}
