//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for the sponsorship tree, catalog, rebates and ranks

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{ChildFilter, ChildSort, PendingRebates, Repository, SortField, SortOrder};
