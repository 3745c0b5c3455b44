//! # MongoDB Lens core
//!
//! The engine behind a Model Context Protocol server for MongoDB.
//!
//! This crate provides:
//! - **Caching**: namespaced metadata cache with lazy TTL expiry and a
//!   memory-pressure valve
//! - **Schema inference**: sampled field-path discovery with type sets and
//!   coverage, plus schema diffing, validator synthesis and query-pattern
//!   analysis built on it
//! - **Connection management**: bounded-backoff connect, a watchdog that
//!   reconnects a lost link, and orderly shutdown
//!
//! ## Architecture
//!
//! [`LensServer`] owns one cache and one connection manager and hands them
//! to every component. Protocol handlers are expected to parse requests,
//! call into the server and render the result.

pub mod cache;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod memory;
pub mod resilience;
pub mod schema;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod watchdog;

#[cfg(test)]
pub mod testing;

pub use config::Config;
pub use error::{McpError, ServerError};
pub use server::LensServer;
