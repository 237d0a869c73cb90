//! DB Router Library
//!
//! Resolves a per-request connection hint (named connection, explicit connection string,
//! provider) to a pooled database connection (SQLite, PostgreSQL, MySQL), caching it for
//! the lifetime of the request.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod transport;

pub use config::Config;
pub use db::{ConnectionManager, RequestScope};
pub use error::{DbError, DbResult};
pub use models::ConnectionHint;
