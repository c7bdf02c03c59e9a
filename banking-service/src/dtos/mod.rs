pub mod admin;
pub mod auth;
pub mod client;

pub use admin::TransactionListQuery;
pub use auth::{LoginRequest, LoginResponse, RefreshRequest, TokenResponse};
pub use client::{AccountResponse, TransferRequest};
