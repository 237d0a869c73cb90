//! Dialect registry.
//!
//! Maps provider names (e.g. `Postgres`, `SqlServer`) to immutable dialect descriptors.
//! Entries are stored as `Arc`s and replaced wholesale, so a reader either sees the old
//! descriptor or the new one.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Connection-string and SQL quoting rules for one database engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialectDescriptor {
    /// Provider name; the registry key.
    pub name: String,
    /// Driver used to open connections. `None` when no driver is compiled in.
    pub backend: Option<DatabaseType>,
    pub quote_open: char,
    pub quote_close: char,
}

impl DialectDescriptor {
    pub fn new(name: impl Into<String>, backend: Option<DatabaseType>) -> Self {
        let (quote_open, quote_close) = match backend {
            Some(DatabaseType::MySQL) => ('`', '`'),
            _ => ('"', '"'),
        };
        Self {
            name: name.into(),
            backend,
            quote_open,
            quote_close,
        }
    }

    pub fn with_quotes(mut self, open: char, close: char) -> Self {
        self.quote_open = open;
        self.quote_close = close;
        self
    }

    /// Quote an identifier, doubling any embedded closing quote.
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let mut quoted = String::with_capacity(identifier.len() + 2);
        quoted.push(self.quote_open);
        for c in identifier.chars() {
            if c == self.quote_close {
                quoted.push(c);
            }
            quoted.push(c);
        }
        quoted.push(self.quote_close);
        quoted
    }

    /// Descriptors registered by [`DialectRegistry::with_builtin_dialects`].
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::new("SqlServer", None).with_quotes('[', ']'),
            Self::new(DatabaseType::PostgreSQL.provider_name(), Some(DatabaseType::PostgreSQL)),
            Self::new(DatabaseType::MySQL.provider_name(), Some(DatabaseType::MySQL)),
            Self::new(DatabaseType::SQLite.provider_name(), Some(DatabaseType::SQLite)),
        ]
    }
}

#[derive(Debug, Default)]
pub struct DialectRegistry {
    dialects: RwLock<HashMap<String, Arc<DialectDescriptor>>>,
}

impl DialectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in dialects.
    pub fn with_builtin_dialects() -> Self {
        let registry = Self::new();
        for descriptor in DialectDescriptor::builtin() {
            registry.register(descriptor);
        }
        registry
    }

    /// Register a dialect, replacing any existing entry with the same name.
    pub fn register(&self, descriptor: DialectDescriptor) -> Arc<DialectDescriptor> {
        let descriptor = Arc::new(descriptor);
        debug!(provider = %descriptor.name, backend = ?descriptor.backend, "Registering dialect");
        self.write()
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        descriptor
    }

    pub fn lookup(&self, provider_name: &str) -> DbResult<Arc<DialectDescriptor>> {
        self.read()
            .get(provider_name)
            .cloned()
            .ok_or_else(|| DbError::unknown_provider(provider_name))
    }

    pub fn contains(&self, provider_name: &str) -> bool {
        self.read().contains_key(provider_name)
    }

    /// Registered provider names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    // Every write is a single insert, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<DialectDescriptor>>> {
        self.dialects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<DialectDescriptor>>> {
        self.dialects.write().unwrap_or_else(|e| e.into_inner())
    }
}
