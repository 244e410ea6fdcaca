//! Shared pieces of the HTTP surface.

pub mod common;
