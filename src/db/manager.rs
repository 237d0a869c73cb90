//! Connection manager facade.
//!
//! Owns the dialect and connection registries, the resolver and the pool set, and
//! exposes the administrative registration API plus per-request connection access.

use crate::config::{ConnectionConfig, ParsedConnections, PoolOptions, PoolSettings};
use crate::db::dialect::{DialectDescriptor, DialectRegistry};
use crate::db::pool::{ConnectionHandle, ConnectionPools};
use crate::db::registry::ConnectionRegistry;
use crate::db::resolver::ConnectionResolver;
use crate::db::scope::{RequestScope, SlotKind, SlotProvider};
use crate::error::DbResult;
use crate::models::{ConnectionHint, ConnectionSummary, EffectiveConnectionParams, NamedConnectionEntry};
use std::sync::Arc;
use tracing::info;

/// Shared entry point for connection registration and per-request access.
///
/// Cloning is cheap; clones share registries and pools.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    dialects: Arc<DialectRegistry>,
    connections: Arc<ConnectionRegistry>,
    resolver: ConnectionResolver,
    pools: Arc<ConnectionPools>,
}

impl ConnectionManager {
    /// Create a manager with empty registries.
    pub fn new(settings: PoolSettings) -> Self {
        Self::with_dialects(DialectRegistry::new(), settings)
    }

    /// Create a manager with `SqlServer`, `Postgres`, `MySql` and `Sqlite` registered.
    pub fn with_builtin_dialects(settings: PoolSettings) -> Self {
        Self::with_dialects(DialectRegistry::with_builtin_dialects(), settings)
    }

    fn with_dialects(dialects: DialectRegistry, settings: PoolSettings) -> Self {
        let dialects = Arc::new(dialects);
        let connections = Arc::new(ConnectionRegistry::new());
        let resolver = ConnectionResolver::new(Arc::clone(&dialects), Arc::clone(&connections))
            .with_default_pool_options(settings.defaults.clone());
        Self {
            dialects,
            connections,
            resolver,
            pools: ConnectionPools::new(settings),
        }
    }

    pub fn dialects(&self) -> &DialectRegistry {
        &self.dialects
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn pools(&self) -> &ConnectionPools {
        &self.pools
    }

    pub fn register_dialect(&self, descriptor: DialectDescriptor) -> Arc<DialectDescriptor> {
        self.dialects.register(descriptor)
    }

    /// Set the default connection. Fails with `UnknownProvider` if the provider has no
    /// registered dialect.
    pub fn register_default(
        &self,
        connection_string: impl Into<String>,
        provider_name: &str,
        pool_options: PoolOptions,
    ) -> DbResult<Arc<NamedConnectionEntry>> {
        self.dialects.lookup(provider_name)?;
        Ok(self
            .connections
            .register_default(connection_string, provider_name, pool_options))
    }

    /// Insert or replace a named connection.
    ///
    /// Fails with `InvalidName` for an empty name and `UnknownProvider` for an
    /// unregistered provider; a failed call changes nothing.
    pub fn register_connection(
        &self,
        name: &str,
        connection_string: impl Into<String>,
        provider_name: &str,
        pool_options: PoolOptions,
    ) -> DbResult<Arc<NamedConnectionEntry>> {
        crate::db::registry::validate_name(name)?;
        self.dialects.lookup(provider_name)?;
        self.connections
            .register_connection(name, connection_string, provider_name, pool_options)
    }

    /// Register one connection parsed from configuration.
    pub fn register_config(&self, config: &ConnectionConfig) -> DbResult<Arc<NamedConnectionEntry>> {
        if config.name.is_empty() {
            self.register_default(
                config.connection_string.clone(),
                &config.provider,
                config.pool_options.clone(),
            )
        } else {
            self.register_connection(
                &config.name,
                config.connection_string.clone(),
                &config.provider,
                config.pool_options.clone(),
            )
        }
    }

    /// Register every configured connection. Stops at the first failure.
    pub fn register_all(&self, parsed: &ParsedConnections) -> DbResult<usize> {
        let mut count = 0;
        for config in parsed.default.iter().chain(&parsed.named) {
            self.register_config(config)?;
            count += 1;
        }
        info!(count, "Registered configured connections");
        Ok(count)
    }

    /// Remove a named connection. Open pools for its connection string stay until idle.
    pub fn remove_connection(&self, name: &str) -> bool {
        self.connections.remove_connection(name).is_some()
    }

    /// Registered connections, default first; connection strings masked.
    pub fn list_connections(&self) -> Vec<ConnectionSummary> {
        self.connections
            .entries()
            .iter()
            .map(|entry| ConnectionSummary::from(entry.as_ref()))
            .collect()
    }

    /// Resolve a hint without opening anything.
    pub fn resolve(&self, hint: &ConnectionHint) -> DbResult<EffectiveConnectionParams> {
        self.resolver.resolve(hint)
    }

    /// Resolve and open a connection outside of any request scope.
    ///
    /// The caller owns the lease and must release or drop it.
    pub async fn open(&self, hint: &ConnectionHint) -> DbResult<ConnectionHandle> {
        let params = self.resolver.resolve(hint)?;
        self.pools.open(&params).await
    }

    /// The request's database connection, opened on first access and reused after.
    pub async fn get_connection(&self, scope: &RequestScope) -> DbResult<Arc<ConnectionHandle>> {
        scope.get_or_resolve(self).await
    }

    pub async fn close_all(&self) {
        self.pools.close_all().await;
    }
}

impl SlotProvider for ConnectionManager {
    type Handle = ConnectionHandle;

    fn slot_kind(&self) -> SlotKind {
        SlotKind::Database
    }

    async fn acquire(&self, hint: &ConnectionHint) -> DbResult<ConnectionHandle> {
        self.open(hint).await
    }
}
