//! Role gate. Pure functions over the caller's role; membership is explicit,
//! so `SuperAdmin` satisfies a requirement only when it is listed.

use crate::models::{Principal, Role};

/// Operations exposed over HTTP that need an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    EndSession,
    ViewOwnAccounts,
    CreateTransfer,
    ReviewTransactions,
    DecideTransactions,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::EndSession => "end_session",
            Capability::ViewOwnAccounts => "view_own_accounts",
            Capability::CreateTransfer => "create_transfer",
            Capability::ReviewTransactions => "review_transactions",
            Capability::DecideTransactions => "decide_transactions",
        }
    }

    pub fn required_roles(&self) -> &'static [Role] {
        match self {
            Capability::EndSession => &[Role::Client, Role::Admin, Role::SuperAdmin],
            Capability::ViewOwnAccounts | Capability::CreateTransfer => &[Role::Client],
            Capability::ReviewTransactions | Capability::DecideTransactions => {
                &[Role::Admin, Role::SuperAdmin]
            }
        }
    }
}

pub fn authorize(principal: &Principal, required_roles: &[Role]) -> bool {
    required_roles.contains(&principal.role)
}
