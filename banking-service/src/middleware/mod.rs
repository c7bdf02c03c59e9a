pub mod auth;
pub mod guard;

pub use auth::AuthUser;
pub use guard::{guard_middleware, RoutePolicy, Throttle};
