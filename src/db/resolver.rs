//! Connection resolver.
//!
//! Turns a [`ConnectionHint`] into [`EffectiveConnectionParams`] using the dialect and
//! connection registries. Precedence, first applicable rule wins:
//!
//! 1. explicit connection string (dialect from the hint's provider, else the default
//!    entry's dialect)
//! 2. named connection (provider in the hint overrides the entry's dialect)
//! 3. the default entry, with its own connection string and dialect
//!
//! Resolution only reads the registries; it performs no I/O and never falls back from
//! a failed rule to a lower one.

use crate::config::PoolOptions;
use crate::db::dialect::{DialectDescriptor, DialectRegistry};
use crate::db::registry::ConnectionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionHint, EffectiveConnectionParams, ResolutionSource};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    dialects: Arc<DialectRegistry>,
    connections: Arc<ConnectionRegistry>,
    /// Pool options for explicit connection strings, which have no registry entry.
    default_pool_options: PoolOptions,
}

impl ConnectionResolver {
    pub fn new(dialects: Arc<DialectRegistry>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            dialects,
            connections,
            default_pool_options: PoolOptions::default(),
        }
    }

    pub fn with_default_pool_options(mut self, pool_options: PoolOptions) -> Self {
        self.default_pool_options = pool_options;
        self
    }

    pub fn resolve(&self, hint: &ConnectionHint) -> DbResult<EffectiveConnectionParams> {
        let params = if let Some(connection_string) = hint.connection_string() {
            // The default entry's dialect applies here even though its connection
            // string does not, unless the hint names a provider.
            let dialect = match hint.provider_name() {
                Some(provider) => self.dialects.lookup(provider)?,
                None => {
                    let default = self
                        .connections
                        .default_entry()
                        .ok_or(DbError::NoDefaultConnection)?;
                    self.dialects.lookup(&default.provider_name)?
                }
            };
            EffectiveConnectionParams {
                connection_string: connection_string.to_string(),
                dialect,
                pool_options: self.default_pool_options.clone(),
                source: ResolutionSource::ExplicitConnectionString,
            }
        } else if let Some(name) = hint.named_connection() {
            let entry = self.connections.resolve_by_name(Some(name))?;
            let dialect = self.dialect_for(hint, &entry.provider_name)?;
            EffectiveConnectionParams {
                connection_string: entry.connection_string.clone(),
                dialect,
                pool_options: entry.pool_options.clone(),
                source: ResolutionSource::Named(entry.name.clone()),
            }
        } else {
            // A provider alone does not re-dialect the default entry.
            let entry = self.connections.resolve_by_name(None)?;
            let dialect = self.dialects.lookup(&entry.provider_name)?;
            EffectiveConnectionParams {
                connection_string: entry.connection_string.clone(),
                dialect,
                pool_options: entry.pool_options.clone(),
                source: ResolutionSource::Default,
            }
        };

        debug!(
            source = %params.source,
            provider = %params.provider_name(),
            connection = %params.masked_connection_string(),
            "Resolved connection"
        );
        Ok(params)
    }

    /// Dialect for a named entry, honouring a provider override in the hint.
    fn dialect_for(
        &self,
        hint: &ConnectionHint,
        entry_provider: &str,
    ) -> DbResult<Arc<DialectDescriptor>> {
        self.dialects
            .lookup(hint.provider_name().unwrap_or(entry_provider))
    }
}
