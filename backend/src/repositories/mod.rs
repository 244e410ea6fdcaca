//! Data access layer.
//!
//! Each repository borrows the shared `SqlitePool` and maps one table.

pub mod refresh_token_repository;
pub mod user_repository;
