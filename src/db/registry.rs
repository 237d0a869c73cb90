//! Connection factory registry.
//!
//! Holds the default (unnamed) connection entry plus any number of named entries.
//! Entries are immutable `Arc`s; registering a name again swaps in a new entry under
//! the write lock, so resolvers never observe a partially updated entry.

use crate::config::PoolOptions;
use crate::error::{DbError, DbResult};
use crate::models::NamedConnectionEntry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

#[derive(Debug, Default)]
struct Entries {
    default: Option<Arc<NamedConnectionEntry>>,
    named: HashMap<String, Arc<NamedConnectionEntry>>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<Entries>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default (unnamed) connection entry.
    pub fn register_default(
        &self,
        connection_string: impl Into<String>,
        provider_name: impl Into<String>,
        pool_options: PoolOptions,
    ) -> Arc<NamedConnectionEntry> {
        let entry = Arc::new(NamedConnectionEntry {
            name: String::new(),
            connection_string: connection_string.into(),
            provider_name: provider_name.into(),
            pool_options,
        });

        info!(
            provider = %entry.provider_name,
            connection = %entry.masked_connection_string(),
            "Registered default connection"
        );
        self.write().default = Some(Arc::clone(&entry));
        entry
    }

    /// Insert or replace a named connection entry.
    ///
    /// The empty name is reserved for the default entry and is rejected with
    /// [`DbError::InvalidName`]; a rejected call leaves the registry untouched.
    pub fn register_connection(
        &self,
        name: impl Into<String>,
        connection_string: impl Into<String>,
        provider_name: impl Into<String>,
        pool_options: PoolOptions,
    ) -> DbResult<Arc<NamedConnectionEntry>> {
        let name = name.into();
        validate_name(&name)?;

        let entry = Arc::new(NamedConnectionEntry {
            name: name.clone(),
            connection_string: connection_string.into(),
            provider_name: provider_name.into(),
            pool_options,
        });

        let replaced = self
            .write()
            .named
            .insert(name.clone(), Arc::clone(&entry))
            .is_some();

        info!(
            connection = %name,
            provider = %entry.provider_name,
            replaced,
            "Registered named connection"
        );
        Ok(entry)
    }

    /// Look up an entry. `None` or an empty name selects the default entry.
    pub fn resolve_by_name(&self, name: Option<&str>) -> DbResult<Arc<NamedConnectionEntry>> {
        let entries = self.read();
        match name.filter(|n| !n.is_empty()) {
            None => entries.default.clone().ok_or(DbError::NoDefaultConnection),
            Some(name) => entries
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| DbError::unknown_named_connection(name)),
        }
    }

    /// The default entry, if registered.
    pub fn default_entry(&self) -> Option<Arc<NamedConnectionEntry>> {
        self.read().default.clone()
    }

    /// Remove a named entry. Returns the removed entry, if any.
    pub fn remove_connection(&self, name: &str) -> Option<Arc<NamedConnectionEntry>> {
        let removed = self.write().named.remove(name);
        if removed.is_some() {
            info!(connection = %name, "Removed named connection");
        }
        removed
    }

    pub fn has_default(&self) -> bool {
        self.read().default.is_some()
    }

    /// Named entry names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().named.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of all entries, default first, then named entries by name.
    pub fn entries(&self) -> Vec<Arc<NamedConnectionEntry>> {
        let entries = self.read();
        let mut named: Vec<_> = entries.named.values().cloned().collect();
        named.sort_by(|a, b| a.name.cmp(&b.name));
        entries.default.iter().cloned().chain(named).collect()
    }

    /// Number of named entries (the default entry is not counted).
    pub fn len(&self) -> usize {
        self.read().named.len()
    }

    pub fn is_empty(&self) -> bool {
        let entries = self.read();
        entries.default.is_none() && entries.named.is_empty()
    }

    // Writes are single field assignments or inserts; recover from poisoning.
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Validate a connection name for registration.
pub fn validate_name(name: &str) -> DbResult<()> {
    if name.trim().is_empty() {
        return Err(DbError::invalid_name(
            name,
            "the empty name is reserved for the default connection",
        ));
    }
    Ok(())
}
