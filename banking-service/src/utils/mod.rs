pub mod password;
pub mod validation;

pub use password::{
    hash_password, verify_password, verify_password_blocking, Password, PasswordHashString,
};
pub use validation::ValidatedJson;
