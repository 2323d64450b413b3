//! HTTP handlers.

pub mod extract;
pub mod health;
