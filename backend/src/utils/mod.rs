//! Token and password primitives used by the session service.

pub mod jwt;
pub mod password;
