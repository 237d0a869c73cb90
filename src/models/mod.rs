//! Data models for the connection router.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;

// Re-export commonly used types
pub use connection::{
    ConnectionHint, ConnectionSummary, DatabaseType, EffectiveConnectionParams,
    IntoConnectionHint, NamedConnectionEntry, ResolutionSource, mask_connection_string,
};
