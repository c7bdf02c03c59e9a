//! Client-facing account and transfer endpoints.

use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::dtos::{AccountResponse, TransferRequest};
use crate::middleware::AuthUser;
use crate::models::{ClientDashboard, Transaction};
use crate::utils::ValidatedJson;
use crate::AppState;

/// GET /api/v1/client/accounts
pub async fn list_accounts(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<AccountResponse>>, AppError> {
    let accounts = state
        .store
        .list_accounts_for_owner(principal.identity_id)
        .await?;
    Ok(Json(accounts.into_iter().map(AccountResponse::from).collect()))
}

/// GET /api/v1/client/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<Vec<Transaction>>, AppError> {
    Ok(Json(state.transactions.list_for_client(&principal).await?))
}

/// GET /api/v1/client/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<ClientDashboard>, AppError> {
    Ok(Json(state.transactions.client_dashboard(&principal).await?))
}

/// POST /api/v1/client/payments/transfer
///
/// Replays with the same idempotency key return the original transaction.
pub async fn create_transfer(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<TransferRequest>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state
        .transactions
        .create_transfer(&principal, req.into())
        .await?;
    Ok(Json(transaction))
}
