//! Transaction review endpoints for admins.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::TransactionListQuery;
use crate::middleware::AuthUser;
use crate::models::{AdminDashboard, AuditEntry, Decision, Transaction};
use crate::AppState;

/// GET /api/v1/admin/transactions?status=
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    Ok(Json(state.transactions.admin_list(query.status).await?))
}

/// GET /api/v1/admin/dashboard
pub async fn dashboard(State(state): State<AppState>) -> Result<Json<AdminDashboard>, AppError> {
    Ok(Json(state.transactions.admin_dashboard().await?))
}

/// PUT /api/v1/admin/transactions/:id/approve
pub async fn approve(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state
        .transactions
        .decide(transaction_id, &principal, Decision::Approve)
        .await?;
    Ok(Json(transaction))
}

/// PUT /api/v1/admin/transactions/:id/reject
pub async fn reject(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state
        .transactions
        .decide(transaction_id, &principal, Decision::Reject)
        .await?;
    Ok(Json(transaction))
}

/// GET /api/v1/admin/transactions/:id/audit
pub async fn audit_trail(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(state.transactions.audit_trail(transaction_id).await?))
}
