//! shoal controller library.
//!
//! This crate primarily ships a `controller` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod attach;
pub mod cluster;
pub mod config;
pub mod registry;
pub mod scheduler;
pub mod state;
