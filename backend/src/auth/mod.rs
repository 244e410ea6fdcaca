//! Authentication module for managing user accounts and sessions.
//!
//! This module provides the public interface for registration, login, token
//! refresh, logout and the bearer-token middleware.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod service;
