//! Core logic for skeg development environments
//!
//! This crate provides:
//! - Port spec parsing
//! - Reconciliation of runtime containers with local environment directories
//! - Base image resolution and per-user image builds
//! - Environment lifecycle (create, rebuild, start, stop, destroy)
//! - SSH readiness polling and connection hand-off

mod environment;
mod error;
mod images;
mod keys;
mod manager;
pub mod naming;
mod ports;
mod store;

pub use environment::*;
pub use error::*;
pub use images::*;
pub use keys::*;
pub use manager::*;
pub use ports::*;
pub use store::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
