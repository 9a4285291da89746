use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument};

use conduit_core::connector::{ConnectorFactory, ToolConnector};
use conduit_core::errors::OrchestrationError;
use conduit_core::ids::SessionId;
use conduit_core::mcp_config::McpConfig;
use conduit_core::tools::ToolCatalog;

#[derive(Clone, Default)]
struct CachedCatalog {
    catalog: ToolCatalog,
    /// Server name to the config fingerprint its tools were fetched with.
    bindings: BTreeMap<String, String>,
}

/// Per-session tool catalogs.
#[derive(Default)]
pub struct ToolCatalogCache {
    entries: DashMap<SessionId, CachedCatalog>,
}

impl ToolCatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session's catalog, or an empty one.
    pub fn get(&self, session_id: &SessionId) -> ToolCatalog {
        self.entries
            .get(session_id)
            .map(|e| e.catalog.clone())
            .unwrap_or_default()
    }

    pub fn set(&self, session_id: &SessionId, catalog: ToolCatalog) {
        self.entries.entry(session_id.clone()).or_default().catalog = catalog;
    }

    pub fn missing<'a, I>(&self, session_id: &SessionId, required: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self.entries.get(session_id) {
            Some(entry) => entry.catalog.missing(required),
            None => required.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn remove(&self, session_id: &SessionId) {
        self.entries.remove(session_id);
    }

    fn record_bindings(&self, session_id: &SessionId, config: &McpConfig, servers: &[String]) {
        let mut entry = self.entries.entry(session_id.clone()).or_default();
        for name in servers {
            if let Some(server) = config.server(name) {
                entry.bindings.insert(name.clone(), server.fingerprint());
            }
        }
    }

    /// True when any cached server was fetched under settings that differ
    /// from `config`.
    fn has_rebound_server(&self, session_id: &SessionId, config: &McpConfig) -> bool {
        let Some(entry) = self.entries.get(session_id) else {
            return false;
        };
        config.connections.iter().any(|server| {
            entry
                .bindings
                .get(&server.name)
                .is_some_and(|fp| *fp != server.fingerprint())
        })
    }

    /// True when the cached catalog lacks a configured server or holds tools
    /// fetched under different connection settings.
    fn is_stale(&self, session_id: &SessionId, config: &McpConfig) -> bool {
        let Some(entry) = self.entries.get(session_id) else {
            return false;
        };
        config.connections.iter().any(|server| {
            !entry.catalog.contains_server(&server.name)
                || entry
                    .bindings
                    .get(&server.name)
                    .is_some_and(|fp| *fp != server.fingerprint())
        })
    }
}

/// Owns the catalog cache and one tool connector per session.
pub struct CatalogService {
    cache: ToolCatalogCache,
    factory: Arc<dyn ConnectorFactory>,
    connectors: DashMap<SessionId, Arc<dyn ToolConnector>>,
}

impl CatalogService {
    pub fn new(factory: Arc<dyn ConnectorFactory>) -> Self {
        Self {
            cache: ToolCatalogCache::new(),
            factory,
            connectors: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &ToolCatalogCache {
        &self.cache
    }

    /// The connector bound for a session.
    pub fn connector(
        &self,
        session_id: &SessionId,
    ) -> Result<Arc<dyn ToolConnector>, OrchestrationError> {
        self.connectors
            .get(session_id)
            .map(|c| c.clone())
            .ok_or_else(|| OrchestrationError::service_not_connected(session_id.as_str()))
    }

    fn connector_or_create(&self, session_id: &SessionId) -> Arc<dyn ToolConnector> {
        self.connectors
            .entry(session_id.clone())
            .or_insert_with(|| self.factory.create(session_id))
            .clone()
    }

    async fn fetch_into_cache(
        &self,
        session_id: &SessionId,
        config: &McpConfig,
        connector: &Arc<dyn ToolConnector>,
        missing: BTreeSet<String>,
    ) -> Result<ToolCatalog, OrchestrationError> {
        let wanted: Vec<String> = missing.into_iter().collect();
        let fetched = connector.discover(&wanted).await?;
        let fetched_names: Vec<String> = fetched.server_names().map(str::to_string).collect();
        debug!(
            session_id = %session_id,
            requested = wanted.len(),
            fetched = fetched_names.len(),
            "catalog fetched"
        );

        let mut catalog = self.cache.get(session_id);
        catalog.merge(fetched);
        self.cache.set(session_id, catalog.clone());
        self.cache.record_bindings(session_id, config, &fetched_names);
        Ok(catalog)
    }

    /// Serve the cached catalog, fetching only servers it does not have yet.
    #[instrument(skip(self, config), fields(session_id = %session_id))]
    pub async fn refresh_missing(
        &self,
        session_id: &SessionId,
        config: &McpConfig,
    ) -> Result<ToolCatalog, OrchestrationError> {
        if self.cache.has_rebound_server(session_id, config) {
            info!(session_id = %session_id, "server settings changed, dropping cached catalog");
            self.cache.remove(session_id);
        }
        let connector = self.connector_or_create(session_id);
        connector.bind(&config.connections).await?;

        let names = config.server_names();
        let missing = self
            .cache
            .missing(session_id, names.iter().map(String::as_str));
        if missing.is_empty() {
            return Ok(self.cache.get(session_id));
        }
        self.fetch_into_cache(session_id, config, &connector, missing)
            .await
    }

    /// Rebuild the catalog from scratch if it no longer matches `config`.
    #[instrument(skip(self, config), fields(session_id = %session_id))]
    pub async fn refresh(
        &self,
        session_id: &SessionId,
        config: &McpConfig,
    ) -> Result<ToolCatalog, OrchestrationError> {
        if self.cache.is_stale(session_id, config) {
            info!(session_id = %session_id, "cached catalog is stale, dropping it");
            self.cache.remove(session_id);
        }
        self.refresh_missing(session_id, config).await
    }
}
