//! Connection resolution and pooling.
//!
//! This module provides:
//! - Dialect registry (provider name to dialect descriptor)
//! - Connection registry (logical name to connection entry)
//! - Resolver applying hint precedence
//! - Connection pools keyed by connection string
//! - Request-scoped handle cache
//! - Backend dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod dialect;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod scope;

pub use dialect::{DialectDescriptor, DialectRegistry};
pub use manager::ConnectionManager;
pub use pool::{ConnectionHandle, ConnectionPools, DbPool, PooledConnection};
pub use registry::ConnectionRegistry;
pub use resolver::ConnectionResolver;
pub use scope::{RequestScope, ScopedResource, SlotKind, SlotProvider};
