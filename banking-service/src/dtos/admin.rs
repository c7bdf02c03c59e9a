use serde::Deserialize;

use crate::models::TransactionStatus;

#[derive(Debug, Default, Deserialize)]
pub struct TransactionListQuery {
    pub status: Option<TransactionStatus>,
}
