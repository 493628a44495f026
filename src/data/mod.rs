//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Activity feed queries

mod database;
mod feed_query;
mod models;

pub use database::Database;
pub use feed_query::FeedFilter;
pub use models::*;

#[cfg(test)]
mod database_test;
