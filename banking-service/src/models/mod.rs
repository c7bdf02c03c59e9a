//! Domain models for banking-service.

mod account;
mod audit_event;
mod dashboard;
mod identity;
mod session;
mod transaction;

pub use account::Account;
pub use audit_event::{AuditAction, AuditEntry, AuditOutcome, SubjectType};
pub use dashboard::{balances_by_currency, AdminDashboard, ClientDashboard, CurrencyBalance};
pub use identity::{FailureState, Identity, IdentityStatus, LockoutPolicy, Principal, Role};
pub use session::{RefreshSession, RefreshTokenRecord, RevokeReason};
pub use transaction::{
    Decision, NewTransfer, StatusSummary, Transaction, TransactionFilter, TransactionStatus,
};
