//! Client library for a task-management REST API.
//!
//! The pieces, leaves first: [`api`] talks HTTP, [`query`] caches what it
//! returns, [`tasks`] runs mutations against that cache, and [`search`]
//! debounces and gates search input in front of it.

pub mod api;
pub mod auth;
pub mod config;
pub mod debounce;
pub mod error;
pub mod highlight;
pub mod logging;
pub mod query;
pub mod recent;
pub mod search;
pub mod storage;
pub mod tasks;
pub mod validation;

#[cfg(test)]
mod testing;

pub use error::{ApiError, StorageError, ValidationErrors};
