pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod database;
pub mod error;
pub mod jwt;
pub mod memory;
pub mod metrics;
pub mod rate_limiter;
pub mod rbac;
pub mod revocation;
pub mod store;
pub mod token;
pub mod transaction;

pub use audit::AuditLog;
pub use auth::AuthService;
pub use database::Database;
pub use error::{AuthError, StoreError, TxError, ValidationError};
pub use jwt::JwtService;
pub use memory::MemoryStore;
pub use rate_limiter::{Admission, RateLimiter};
pub use rbac::{authorize, Capability};
pub use revocation::{InMemoryRevocationCache, RedisRevocationCache, RevocationCache};
pub use store::Store;
pub use token::{TokenPair, TokenService};
pub use transaction::{TransactionEngine, TransferCommand};
