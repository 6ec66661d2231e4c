//! Data source registry.
//!
//! Resolves the `datasource` property of a store to an already-configured
//! pool, and the `category` property to a query template set.

use crate::sql::SqlPool;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::DialectCatalog;

/// Named pools plus the dialect catalog stores are initialized against.
pub struct DataSourceRegistry<P: SqlPool> {
    pools: HashMap<String, Arc<P>>,
    catalog: DialectCatalog,
}

impl<P: SqlPool> Default for DataSourceRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SqlPool> DataSourceRegistry<P> {
    /// An empty registry using the built-in dialect presets.
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
            catalog: DialectCatalog::builtin(),
        }
    }

    /// Replace the dialect catalog.
    pub fn with_catalog(mut self, catalog: DialectCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Register a pool under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, pool: P) -> &mut Self {
        self.register_shared(name, Arc::new(pool))
    }

    pub fn register_shared(&mut self, name: impl Into<String>, pool: Arc<P>) -> &mut Self {
        self.pools.insert(name.into(), pool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<P>> {
        self.pools.get(name).cloned()
    }

    pub fn catalog(&self) -> &DialectCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut DialectCatalog {
        &mut self.catalog
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.pools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
