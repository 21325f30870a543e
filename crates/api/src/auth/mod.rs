//! Authentication for Blogify

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, IssuedToken, JwtError, JwtManager};
pub use middleware::{apply_staleness_policy, require_session, CurrentSession};
pub use password::{hash_password, validate_password_strength, verify_password};
