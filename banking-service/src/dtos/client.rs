use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::Account;
use crate::services::TransferCommand;

#[derive(Debug, Deserialize, Validate)]
pub struct TransferRequest {
    pub from_account: Uuid,

    pub to_account: Uuid,

    #[validate(range(min = 1, message = "Amount must be greater than zero"))]
    pub amount: i64,

    #[validate(length(min = 1, max = 128, message = "Idempotency key must be 1-128 characters"))]
    pub idempotency_key: String,

    #[validate(length(max = 255, message = "Description is too long"))]
    pub description: Option<String>,
}

impl From<TransferRequest> for TransferCommand {
    fn from(request: TransferRequest) -> Self {
        Self {
            from_account: request.from_account,
            to_account: request.to_account,
            amount: request.amount,
            idempotency_key: request.idempotency_key,
            description: request
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account_id: Uuid,
    pub account_number: String,
    pub currency: String,
    pub balance: i64,
    pub available_balance: i64,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            available_balance: account.available_balance(),
            account_id: account.account_id,
            account_number: account.account_number,
            currency: account.currency,
            balance: account.balance,
        }
    }
}
